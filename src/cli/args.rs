//! Clap command definitions (spec.md §6), mirroring the teacher's
//! `cli::types::Cli`/`Commands` derive shape, narrowed to the four verbs
//! spec.md names.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "apm-auto")]
#[command(about = "Autonomous agent orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format (also settable per-subcommand on `status`).
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the orchestration loop, optionally scoped.
    Start {
        /// Scope arguments: `phase:N|N-M`, `task:P.T[,P.T]*`, `agent:<pattern>`.
        scope: Vec<String>,

        /// Parse and report the resolved scope without spawning any workers.
        #[arg(long)]
        dry_run: bool,
    },

    /// Stop the orchestration loop.
    Stop {
        /// Terminate in-flight agents immediately rather than waiting for
        /// their current task to reach a terminal state.
        #[arg(long)]
        force: bool,
    },

    /// Report current orchestration status.
    Status {
        /// Emit the status report as JSON (`cli::json::StatusReport`).
        #[arg(long)]
        json: bool,
    },

    /// Resume a previously paused or interrupted session.
    Resume,
}
