//! Domain-level errors for the coordination core (spec.md §7).

use thiserror::Error;

/// Errors surfaced at the core boundary. Recovery behavior per spec.md §7 is
/// documented on each variant.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller fault; surface, no retry.
    #[error("invalid transition for {entity} {id}: {from} -> {to} (allowed: {allowed:?})")]
    InvalidTransition {
        entity: String,
        id: String,
        from: String,
        to: String,
        allowed: Vec<String>,
    },

    /// Surface; caller decides.
    #[error("{entity} not found: {id}")]
    EntityNotFound { entity: String, id: String },

    /// Never retried.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Retried with exponential backoff up to `max_retries`.
    #[error("transient storage error: {0}")]
    StorageTransient(String),

    /// Surface; higher level may retry.
    #[error("connection acquire timed out after {0:?}")]
    ConnectionTimeout(std::time::Duration),

    /// Structured list of field-pathed messages; never retried.
    #[error("validation failed: {0:?}")]
    ValidationError(Vec<String>),

    #[error("plan not found: {0}")]
    PlanNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Orchestration aborts; operator must resolve.
    #[error("cycle detected among tasks: {0:?}")]
    CycleDetected(Vec<String>),

    /// Internal; drives recovery.
    #[error("crash detected for agent {agent_id}: {reason}")]
    CrashDetected { agent_id: String, reason: String },

    /// Escalates after bounded attempts.
    #[error("recovery failed for agent {agent_id} after {attempts} attempts: {reason}")]
    RecoveryFailed {
        agent_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("spawn failed: {0}")]
    SpawnFailed(#[from] crate::spawn::wrapper::SpawnError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Whether the storage retry wrapper (spec.md §4.A) should retry this
    /// error: constraint violations never retry; transient storage errors do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageTransient(_))
    }
}

/// Classify a raw sqlx error into the retry-eligible/constraint-violation
/// split required by spec.md §4.A ("does not retry if the error message
/// indicates constraint violation").
pub fn classify_sqlx_error(err: &sqlx::Error) -> CoreError {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("unique")
        || lowered.contains("foreign key")
        || lowered.contains("check constraint")
    {
        CoreError::ConstraintViolation(message)
    } else {
        CoreError::StorageTransient(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_is_not_retryable() {
        let err = sqlx::Error::Protocol("UNIQUE constraint failed: agents.id".to_string());
        let classified = classify_sqlx_error(&err);
        assert!(!classified.is_retryable());
    }

    #[test]
    fn generic_error_is_retryable() {
        let err = sqlx::Error::Protocol("database is locked".to_string());
        let classified = classify_sqlx_error(&err);
        assert!(classified.is_retryable());
    }
}
