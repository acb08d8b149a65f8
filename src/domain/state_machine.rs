//! Fixed state machines for Agent and Task lifecycles (spec.md §4.C).
//!
//! Generalizes the teacher's per-status `valid_transitions`/
//! `can_transition_to` idiom (see `Task::valid_transitions` in the original
//! abathur codebase) into a shared trait so both machines share the same
//! guard/rejection plumbing.

use crate::domain::errors::CoreError;
use crate::domain::models::{AgentStatus, TaskStatus, TerminationReason};

/// A fixed-adjacency state machine over `Self`.
pub trait StateMachine: Copy + Eq + std::fmt::Debug {
    /// Successor states reachable directly from `self`, ignoring any
    /// additional guard conditions.
    fn allowed_successors(self) -> &'static [Self];

    fn as_str(self) -> &'static str;

    fn can_transition_to(self, next: Self) -> bool {
        self.allowed_successors().contains(&next)
    }
}

impl StateMachine for AgentStatus {
    fn allowed_successors(self) -> &'static [Self] {
        match self {
            Self::Spawning => &[Self::Active, Self::Terminated],
            Self::Active => &[Self::Waiting, Self::Idle, Self::Terminated],
            Self::Waiting => &[Self::Active, Self::Terminated],
            Self::Idle => &[Self::Active, Self::Terminated],
            Self::Terminated => &[],
        }
    }

    fn as_str(self) -> &'static str {
        AgentStatus::as_str(self)
    }
}

impl StateMachine for TaskStatus {
    fn allowed_successors(self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Assigned],
            Self::Assigned => &[Self::InProgress],
            Self::InProgress => &[Self::Blocked, Self::Completed, Self::Failed],
            Self::Blocked => &[Self::InProgress],
            Self::Completed => &[],
            Self::Failed => &[],
        }
    }

    fn as_str(self) -> &'static str {
        TaskStatus::as_str(self)
    }
}

/// Extra guard context for an agent transition beyond the adjacency matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentTransitionGuard {
    pub has_task: bool,
    pub termination_reason: Option<TerminationReason>,
}

/// Validate an agent transition against spec.md §4.C: the adjacency matrix
/// plus the task-presence and crash/error-recovery guards.
pub fn validate_agent_transition(
    agent_id: &str,
    from: AgentStatus,
    to: AgentStatus,
    guard: AgentTransitionGuard,
) -> Result<(), CoreError> {
    if from.is_terminal() {
        return Err(invalid(agent_id, from, to));
    }
    if !from.can_transition_to(to) {
        return Err(invalid(agent_id, from, to));
    }
    if from == AgentStatus::Idle && to == AgentStatus::Active && !guard.has_task {
        return Err(invalid(agent_id, from, to));
    }
    if to == AgentStatus::Idle && guard.has_task {
        return Err(invalid(agent_id, from, to));
    }
    if from == AgentStatus::Terminated && to == AgentStatus::Active {
        return Err(invalid(agent_id, from, to));
    }
    if to == AgentStatus::Active {
        if let Some(reason) = guard.termination_reason {
            if reason.requires_new_agent() {
                return Err(invalid(agent_id, from, to));
            }
        }
    }
    Ok(())
}

fn invalid(agent_id: &str, from: AgentStatus, to: AgentStatus) -> CoreError {
    CoreError::InvalidTransition {
        entity: "agent".to_string(),
        id: agent_id.to_string(),
        from: from.as_str().to_string(),
        to: to.as_str().to_string(),
        allowed: from
            .allowed_successors()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect(),
    }
}

/// Validate a task transition against spec.md §4.C.
pub fn validate_task_transition(task_id: &str, from: TaskStatus, to: TaskStatus) -> Result<(), CoreError> {
    if !from.can_transition_to(to) {
        return Err(CoreError::InvalidTransition {
            entity: "task".to_string(),
            id: task_id.to_string(),
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
            allowed: from
                .allowed_successors()
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
        });
    }
    Ok(())
}
