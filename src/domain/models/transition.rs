//! State transition audit log model (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of entity a transition row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Agent,
    Task,
    Session,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Task => "task",
            Self::Session => "session",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "agent" => Some(Self::Agent),
            "task" => Some(Self::Task),
            "session" => Some(Self::Session),
            _ => None,
        }
    }
}

/// What caused a transition to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionTrigger {
    Automatic,
    UserAction,
    Dependency,
    Error,
    Timeout,
    Manual,
    Recovery,
}

impl TransitionTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::UserAction => "user_action",
            Self::Dependency => "dependency",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Manual => "manual",
            Self::Recovery => "recovery",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "automatic" => Some(Self::Automatic),
            "user_action" => Some(Self::UserAction),
            "dependency" => Some(Self::Dependency),
            "error" => Some(Self::Error),
            "timeout" => Some(Self::Timeout),
            "manual" => Some(Self::Manual),
            "recovery" => Some(Self::Recovery),
            _ => None,
        }
    }
}

/// One row of the audit log. `from_state` is the empty string sentinel on
/// the row created at entity-creation time (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub from_state: String,
    pub to_state: String,
    pub timestamp: DateTime<Utc>,
    pub trigger: TransitionTrigger,
    pub metadata: Option<serde_json::Value>,
}

impl StateTransition {
    /// The sentinel used for `from_state` on a creation row.
    pub const CREATION_SENTINEL: &'static str = "";

    pub fn creation(
        id: impl Into<String>,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        to_state: impl Into<String>,
        trigger: TransitionTrigger,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type,
            entity_id: entity_id.into(),
            from_state: Self::CREATION_SENTINEL.to_string(),
            to_state: to_state.into(),
            timestamp,
            trigger,
            metadata: None,
        }
    }

    pub fn transition(
        id: impl Into<String>,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        trigger: TransitionTrigger,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type,
            entity_id: entity_id.into(),
            from_state: from_state.into(),
            to_state: to_state.into(),
            timestamp,
            trigger,
            metadata: None,
        }
    }

    pub fn is_creation(&self) -> bool {
        self.from_state == Self::CREATION_SENTINEL
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_row_uses_sentinel() {
        let row = StateTransition::creation(
            "t1",
            EntityType::Agent,
            "a1",
            "spawning",
            TransitionTrigger::Automatic,
            Utc::now(),
        );
        assert!(row.is_creation());
        assert_eq!(row.from_state, "");
    }

    #[test]
    fn trigger_round_trip() {
        for t in [
            TransitionTrigger::Automatic,
            TransitionTrigger::UserAction,
            TransitionTrigger::Dependency,
            TransitionTrigger::Error,
            TransitionTrigger::Timeout,
            TransitionTrigger::Manual,
            TransitionTrigger::Recovery,
        ] {
            assert_eq!(TransitionTrigger::parse_str(t.as_str()), Some(t));
        }
    }
}
