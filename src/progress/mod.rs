//! Progress-file pipeline: the typed header/section document, its pattern
//! detectors and validator, and the three poll-driven consumers that watch
//! it (monitor, completion reporter, error escalator) plus the handover
//! detector that runs alongside them.

pub mod completion;
pub mod escalator;
pub mod handover;
pub mod header;
pub mod monitor;
pub mod patterns;
pub mod poller;
pub mod validator;

pub use completion::CompletionReporter;
pub use escalator::{Blocker, ErrorEscalator};
pub use handover::{HandoverConfig, HandoverDetector, HandoverHistoryEntry, HandoverState};
pub use header::{ProgressDocument, ProgressFileError, ProgressHeader, ProgressStatus};
pub use monitor::{AgentLookup, DerivedStatus, ProgressMonitor, TaskProgress};
pub use patterns::{BlockerCategory, BlockerSeverity, DetectedPatterns};
pub use poller::{Poller, PollerConfig, PollTask};
pub use validator::ProgressValidationReport;
