//! Session domain model.
//!
//! A session wraps one orchestrated run of a project: its status, and the
//! periodic checkpoints the manager takes of in-flight agent/task state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Running,
    Paused,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "initializing" => Some(Self::Initializing),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_id: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub pause_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

impl Session {
    pub fn new(id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            status: SessionStatus::Initializing,
            start_time: Utc::now(),
            pause_time: None,
            end_time: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// A point-in-time snapshot of a session's agent/task state, cascade-deleted
/// with its session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub active_agents: Vec<String>,
    pub completed_tasks: Vec<String>,
    pub in_progress_tasks: Vec<String>,
    pub metadata: Option<serde_json::Value>,
}

impl SessionCheckpoint {
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        description: impl Into<String>,
        active_agents: Vec<String>,
        completed_tasks: Vec<String>,
        in_progress_tasks: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            description: description.into(),
            active_agents,
            completed_tasks,
            in_progress_tasks,
            metadata: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_round_trip() {
        for s in [
            SessionStatus::Initializing,
            SessionStatus::Running,
            SessionStatus::Paused,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            assert_eq!(SessionStatus::parse_str(s.as_str()), Some(s));
        }
    }

    #[test]
    fn checkpoint_carries_snapshot() {
        let checkpoint = SessionCheckpoint::new(
            "c1",
            "s1",
            "pre-recovery snapshot",
            vec!["a1".to_string()],
            vec!["1.1".to_string()],
            vec!["1.2".to_string()],
        );
        assert_eq!(checkpoint.active_agents.len(), 1);
    }
}
