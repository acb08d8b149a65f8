//! Runtime validation invoked at every system boundary: storage round-trip,
//! plan parsing, and external input (spec.md §4.B).
//!
//! Validators return a list of field-pathed messages rather than the first
//! error only, matching the teacher's `ConfigLoader::validate` /
//! `AgentTemplate::validate` style of surfacing every problem at once.

use crate::domain::errors::CoreError;
use crate::domain::models::{Agent, Task};

/// Collects field-pathed validation messages across one or more records.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn push(&mut self, field_path: impl Into<String>, message: impl AsRef<str>) {
        self.errors.push(format!("{}: {}", field_path.into(), message.as_ref()));
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<(), CoreError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::ValidationError(self.errors))
        }
    }
}

/// Validate an agent record's §3 invariants, reporting every violation
/// rather than stopping at the first.
pub fn validate_agent(agent: &Agent) -> ValidationReport {
    let mut report = ValidationReport::default();
    if let Err(message) = agent.validate() {
        report.push(format!("agent[{}]", agent.id), message);
    }
    if agent.id.trim().is_empty() {
        report.push("agent.id", "must not be empty");
    }
    report
}

/// Validate a task record's §3 invariants.
pub fn validate_task(task: &Task) -> ValidationReport {
    let mut report = ValidationReport::default();
    if let Err(message) = task.validate() {
        report.push(format!("task[{}]", task.id), message);
    }
    if task.id.trim().is_empty() {
        report.push("task.id", "must not be empty");
    }
    if task.phase_id.trim().is_empty() {
        report.push("task.phase_id", "must not be empty");
    }
    report
}

/// Parse an enum's stored TEXT representation, producing a field-pathed
/// validation message on failure rather than panicking.
pub fn parse_enum_field<T>(
    field_path: &str,
    raw: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, String> {
    parse(raw).ok_or_else(|| format!("{field_path}: unrecognized value {raw:?}"))
}
