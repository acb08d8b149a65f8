//! Recovery manager: heartbeat monitor and bounded crash recovery
//! (spec.md §4.F).

pub mod manager;

pub use manager::{RecoveryConfig, RecoveryManager, RecoveryOutcome, RecoveryStats, RespawnCollaborator};
