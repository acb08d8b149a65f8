//! Agent domain model.
//!
//! Agents are worker processes driven by the orchestration loop. Their
//! lifecycle is governed by the state machine in [`crate::domain::state_machine`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Drives the plan; never assigned tasks itself.
    Manager,
    /// Executes assigned tasks.
    Implementation,
    /// Spawned ad hoc, outside the plan (e.g. delegated sub-investigations).
    AdHoc,
}

impl AgentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Implementation => "implementation",
            Self::AdHoc => "ad_hoc",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "manager" => Some(Self::Manager),
            "implementation" => Some(Self::Implementation),
            "ad_hoc" | "adhoc" => Some(Self::AdHoc),
            _ => None,
        }
    }
}

/// Lifecycle status of an agent. See [`crate::domain::state_machine`] for
/// the allowed transition matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Spawning,
    Active,
    Waiting,
    Idle,
    Terminated,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Active => "active",
            Self::Waiting => "waiting",
            Self::Idle => "idle",
            Self::Terminated => "terminated",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "spawning" => Some(Self::Spawning),
            "active" => Some(Self::Active),
            "waiting" => Some(Self::Waiting),
            "idle" => Some(Self::Idle),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }

    /// `Terminated` is the only absorbing state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Specialisation enum constraining which tasks an Implementation agent may
/// receive. See GLOSSARY in SPEC_FULL.md for the `Agent_<Name>` mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentDomain {
    Foundation,
    Cli,
    Communication,
    Automation,
    Parallel,
    Qa,
    Monitoring,
    Session,
    Config,
    Docs,
    General,
}

impl AgentDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Foundation => "foundation",
            Self::Cli => "cli",
            Self::Communication => "communication",
            Self::Automation => "automation",
            Self::Parallel => "parallel",
            Self::Qa => "qa",
            Self::Monitoring => "monitoring",
            Self::Session => "session",
            Self::Config => "config",
            Self::Docs => "docs",
            Self::General => "general",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "foundation" => Some(Self::Foundation),
            "cli" => Some(Self::Cli),
            "communication" => Some(Self::Communication),
            "automation" => Some(Self::Automation),
            "parallel" => Some(Self::Parallel),
            "qa" => Some(Self::Qa),
            "monitoring" => Some(Self::Monitoring),
            "session" => Some(Self::Session),
            "config" => Some(Self::Config),
            "docs" => Some(Self::Docs),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// Why an agent was or was not cleanly terminated; carried in transition
/// metadata so `Terminated -> Active` can be rejected for crash/error exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Operator- or orchestrator-requested shutdown.
    UserRequested,
    /// Crash detected by the recovery manager (missed heartbeat).
    Crash,
    /// An unrecoverable error surfaced during execution.
    Error,
    /// Task finished and the agent returned to the pool.
    Completed,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserRequested => "user_requested",
            Self::Crash => "crash",
            Self::Error => "error",
            Self::Completed => "completed",
        }
    }

    /// Whether a fresh agent must be minted rather than resurrecting this one.
    pub fn requires_new_agent(self) -> bool {
        matches!(self, Self::Crash | Self::Error)
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user_requested" => Some(Self::UserRequested),
            "crash" => Some(Self::Crash),
            "error" => Some(Self::Error),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// An agent row as persisted by the persistence manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub current_task_id: Option<String>,
    pub domain: Option<AgentDomain>,
    pub spawned_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub process_id: Option<u32>,
    pub worktree_path: Option<String>,
    pub metadata: serde_json::Value,
}

impl Agent {
    /// Construct a freshly spawning agent. Invariant: `status=Spawning` implies
    /// no current task (spec.md §3).
    pub fn new_spawning(id: impl Into<String>, agent_type: AgentType, domain: Option<AgentDomain>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_type,
            status: AgentStatus::Spawning,
            current_task_id: None,
            domain,
            spawned_at: now,
            last_activity_at: now,
            process_id: None,
            worktree_path: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Validate the §3 per-status invariants hold for this row.
    pub fn validate(&self) -> Result<(), String> {
        if self.agent_type == AgentType::Implementation && self.domain.is_none() {
            return Err("agent.domain: required for Implementation agents".to_string());
        }
        match self.status {
            AgentStatus::Spawning if self.current_task_id.is_some() => {
                return Err("agent.current_task_id: must be null while Spawning".to_string())
            }
            AgentStatus::Active | AgentStatus::Waiting if self.current_task_id.is_none() => {
                return Err(format!(
                    "agent.current_task_id: required while {}",
                    self.status.as_str()
                ))
            }
            AgentStatus::Idle if self.current_task_id.is_some() => {
                return Err("agent.current_task_id: must be null while Idle".to_string())
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawning_has_no_task() {
        let agent = Agent::new_spawning("a1", AgentType::Implementation, Some(AgentDomain::Foundation));
        assert_eq!(agent.status, AgentStatus::Spawning);
        assert!(agent.current_task_id.is_none());
        assert!(agent.validate().is_ok());
    }

    #[test]
    fn implementation_requires_domain() {
        let agent = Agent::new_spawning("a1", AgentType::Implementation, None);
        assert!(agent.validate().is_err());
    }

    #[test]
    fn active_requires_task() {
        let mut agent = Agent::new_spawning("a1", AgentType::Implementation, Some(AgentDomain::Qa));
        agent.status = AgentStatus::Active;
        assert!(agent.validate().is_err());
        agent.current_task_id = Some("1.1".to_string());
        assert!(agent.validate().is_ok());
    }

    #[test]
    fn termination_reason_gates_new_agent() {
        assert!(TerminationReason::Crash.requires_new_agent());
        assert!(TerminationReason::Error.requires_new_agent());
        assert!(!TerminationReason::Completed.requires_new_agent());
    }

    #[test]
    fn enum_round_trip() {
        for s in [AgentStatus::Spawning, AgentStatus::Active, AgentStatus::Waiting, AgentStatus::Idle, AgentStatus::Terminated] {
            assert_eq!(AgentStatus::parse_str(s.as_str()), Some(s));
        }
        for d in [
            AgentDomain::Foundation, AgentDomain::Cli, AgentDomain::Communication, AgentDomain::Automation,
            AgentDomain::Parallel, AgentDomain::Qa, AgentDomain::Monitoring, AgentDomain::Session,
            AgentDomain::Config, AgentDomain::Docs, AgentDomain::General,
        ] {
            assert_eq!(AgentDomain::parse_str(d.as_str()), Some(d));
        }
    }
}
