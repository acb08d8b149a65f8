//! apm-auto: an autonomous agent orchestrator coordination core.
//!
//! A Manager process drives a plan of tasks, spawns subordinate
//! Implementation worker processes, tracks their lifecycle, reads their
//! structured progress logs, and recovers from crashes. This crate is the
//! coordination core: a persistent state machine for agents and tasks, a
//! dependency-aware ready-queue over the plan, a heartbeat/crash/recovery
//! loop, and a file-based progress ingestion pipeline whose outputs drive
//! state transitions and escalation. See `SPEC_FULL.md` for the full
//! module breakdown.

pub mod cli;
pub mod config;
pub mod domain;
pub mod events;
pub mod logging;
pub mod orchestration;
pub mod persistence;
pub mod plan;
pub mod progress;
pub mod recovery;
pub mod spawn;
pub mod storage;
