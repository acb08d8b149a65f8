//! Task domain model.
//!
//! Tasks are discrete units of work arranged in a dependency DAG (see
//! [`crate::plan::dependency_resolver`]) and driven through the state
//! machine in [`crate::domain::state_machine`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::AgentDomain;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Blocked,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "assigned" => Some(Self::Assigned),
            "in_progress" | "inprogress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Kind of dependency edge between two tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Must be completed before the dependent becomes ready.
    Required,
    /// Informational only; never blocks readiness.
    Optional,
}

impl DependencyType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Optional => "optional",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "required" => Some(Self::Required),
            "optional" => Some(Self::Optional),
            _ => None,
        }
    }
}

/// Execution mode recorded for a task; opaque to the core beyond display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionType(pub String);

impl Default for ExecutionType {
    fn default() -> Self {
        Self("standard".to_string())
    }
}

/// An edge in the task dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    pub task_id: String,
    pub depends_on_task_id: String,
    pub dependency_type: DependencyType,
    pub description: Option<String>,
}

impl TaskDependency {
    pub fn required(task_id: impl Into<String>, depends_on: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            depends_on_task_id: depends_on.into(),
            dependency_type: DependencyType::Required,
            description: None,
        }
    }

    pub fn optional(task_id: impl Into<String>, depends_on: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            depends_on_task_id: depends_on.into(),
            dependency_type: DependencyType::Optional,
            description: None,
        }
    }
}

/// A task row as persisted by the persistence manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub phase_id: String,
    pub status: TaskStatus,
    pub assigned_agent: Option<String>,
    pub required_domain: Option<AgentDomain>,
    pub priority: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub execution_type: ExecutionType,
    pub memory_log_path: Option<String>,
    pub metadata: serde_json::Value,
}

impl Task {
    pub fn new_pending(id: impl Into<String>, phase_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase_id: phase_id.into(),
            status: TaskStatus::Pending,
            assigned_agent: None,
            required_domain: None,
            priority: 0,
            start_time: None,
            completion_time: None,
            execution_type: ExecutionType::default(),
            memory_log_path: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Validate the §3 per-status constraints hold for this row.
    pub fn validate(&self) -> Result<(), String> {
        match self.status {
            TaskStatus::Pending => {
                if self.assigned_agent.is_some() || self.start_time.is_some() || self.completion_time.is_some() {
                    return Err("task.Pending: assigned_agent/start_time/completion_time must be null".to_string());
                }
            }
            TaskStatus::Assigned => {
                if self.assigned_agent.is_none() {
                    return Err("task.Assigned: assigned_agent required".to_string());
                }
                if self.start_time.is_some() {
                    return Err("task.Assigned: start_time must be null".to_string());
                }
            }
            TaskStatus::InProgress | TaskStatus::Blocked => {
                if self.assigned_agent.is_none() || self.start_time.is_none() {
                    return Err(format!(
                        "task.{}: assigned_agent and start_time required",
                        self.status.as_str()
                    ));
                }
                if self.completion_time.is_some() {
                    return Err(format!("task.{}: completion_time must be null", self.status.as_str()));
                }
            }
            TaskStatus::Completed | TaskStatus::Failed => {
                let Some(completion) = self.completion_time else {
                    return Err(format!("task.{}: completion_time required", self.status.as_str()));
                };
                if let Some(start) = self.start_time {
                    if completion < start {
                        return Err("task: completion_time must be >= start_time".to_string());
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_invariants() {
        let task = Task::new_pending("1.1", "1");
        assert!(task.validate().is_ok());
    }

    #[test]
    fn assigned_requires_agent_no_start() {
        let mut task = Task::new_pending("1.1", "1");
        task.status = TaskStatus::Assigned;
        assert!(task.validate().is_err());
        task.assigned_agent = Some("a1".to_string());
        assert!(task.validate().is_ok());
        task.start_time = Some(Utc::now());
        assert!(task.validate().is_err());
    }

    #[test]
    fn completed_requires_completion_after_start() {
        let mut task = Task::new_pending("1.1", "1");
        task.status = TaskStatus::Completed;
        assert!(task.validate().is_err());

        let start = Utc::now();
        task.assigned_agent = Some("a1".to_string());
        task.start_time = Some(start);
        task.completion_time = Some(start - chrono::Duration::seconds(1));
        assert!(task.validate().is_err());

        task.completion_time = Some(start + chrono::Duration::seconds(1));
        assert!(task.validate().is_ok());
    }

    #[test]
    fn dependency_type_round_trip() {
        for dt in [DependencyType::Required, DependencyType::Optional] {
            assert_eq!(DependencyType::parse_str(dt.as_str()), Some(dt));
        }
    }
}
