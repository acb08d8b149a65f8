//! CLI front end (spec.md §6). The front end itself is a named
//! out-of-scope collaborator; this module carries only the minimal surface
//! spec.md names — `start`, `stop`, `status [--json]`, `resume` — plus the
//! scope grammar and JSON status report the spec's `--json` flag implies.

mod args;
mod status;

pub use args::{Cli, Commands};
pub use status::{print_status, AgentCounts, RecoveryReport, StatusReport, TaskCounts};
