//! Persistence manager: the sole mutator of agent/task/session rows
//! (spec.md §4.D, §3 "Ownership"). Every mutation is one transaction that
//! also writes the matching `StateTransition` row and, on commit, emits the
//! lifecycle event through the [`EventBus`].

use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{classify_sqlx_error, CoreError, CoreResult};
use crate::domain::models::{
    Agent, AgentDomain, AgentStatus, AgentType, DependencyType, EntityType, Session,
    SessionCheckpoint, SessionStatus, StateTransition, Task, TaskDependency, TaskStatus,
    TransitionTrigger,
};
use crate::domain::state_machine::{validate_agent_transition, validate_task_transition, AgentTransitionGuard};
use crate::events::bus::{EventBus, LifecycleEvent};

/// Per-(entity,trigger) transition counts and time-in-state, as required by
/// `getAgentStatistics` (spec.md §4.D).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AgentStatistics {
    pub time_in_state_seconds: HashMap<String, i64>,
    pub transition_counts_by_trigger: HashMap<String, u32>,
    pub total_transitions: u32,
}

pub struct PersistenceManager {
    pool: SqlitePool,
    event_bus: Arc<EventBus>,
}

impl PersistenceManager {
    pub fn new(pool: SqlitePool, event_bus: Arc<EventBus>) -> Self {
        Self { pool, event_bus }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---- Agent operations -------------------------------------------------

    /// Insert an agent row with status `Spawning` and write the `null ->
    /// Spawning` creation transition (spec.md §4.D). Duplicate id fails with
    /// `ConstraintViolation`.
    pub async fn create_agent(
        &self,
        id: &str,
        agent_type: AgentType,
        domain: Option<AgentDomain>,
        metadata: serde_json::Value,
    ) -> CoreResult<Agent> {
        let agent = Agent::new_spawning(id, agent_type, domain);
        agent.validate().map_err(|e| CoreError::ValidationError(vec![e]))?;

        let mut tx = self.pool.begin().await.map_err(|e| classify_sqlx_error(&e))?;

        sqlx::query(
            "INSERT INTO agents (id, agent_type, status, current_task_id, domain, spawned_at, last_activity_at, process_id, worktree_path, metadata_json)
             VALUES (?, ?, ?, NULL, ?, ?, ?, NULL, NULL, ?)",
        )
        .bind(&agent.id)
        .bind(agent_type.as_str())
        .bind(AgentStatus::Spawning.as_str())
        .bind(domain.map(AgentDomain::as_str))
        .bind(agent.spawned_at.to_rfc3339())
        .bind(agent.last_activity_at.to_rfc3339())
        .bind(metadata.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_sqlx_error(&e))?;

        let transition = StateTransition::creation(
            Uuid::new_v4().to_string(),
            EntityType::Agent,
            &agent.id,
            AgentStatus::Spawning.as_str(),
            TransitionTrigger::Automatic,
            agent.spawned_at,
        );
        insert_transition(&mut tx, &transition).await?;

        tx.commit().await.map_err(|e| classify_sqlx_error(&e))?;

        self.event_bus
            .publish(LifecycleEvent::from_transition(&transition))
            .await;

        Ok(Agent { metadata, ..agent })
    }

    /// Validate and apply an agent state transition, writing the transition
    /// row and emitting the matching lifecycle event after commit.
    pub async fn update_agent_state(
        &self,
        id: &str,
        to_state: AgentStatus,
        trigger: TransitionTrigger,
        metadata: Option<serde_json::Value>,
    ) -> CoreResult<Agent> {
        let mut tx = self.pool.begin().await.map_err(|e| classify_sqlx_error(&e))?;

        let mut agent = fetch_agent(&mut tx, id).await?.ok_or_else(|| CoreError::EntityNotFound {
            entity: "agent".to_string(),
            id: id.to_string(),
        })?;

        let termination_reason = metadata
            .as_ref()
            .and_then(|m| m.get("terminationReason"))
            .and_then(|v| v.as_str())
            .and_then(crate::domain::models::TerminationReason::parse_str);

        let guard = AgentTransitionGuard {
            has_task: agent.current_task_id.is_some(),
            termination_reason,
        };
        validate_agent_transition(id, agent.status, to_state, guard)?;

        let now = Utc::now();
        sqlx::query("UPDATE agents SET status = ?, last_activity_at = ? WHERE id = ?")
            .bind(to_state.as_str())
            .bind(now.to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;

        let transition = StateTransition::transition(
            Uuid::new_v4().to_string(),
            EntityType::Agent,
            id,
            agent.status.as_str(),
            to_state.as_str(),
            trigger,
            now,
        );
        let transition = match metadata {
            Some(m) => transition.with_metadata(m),
            None => transition,
        };
        insert_transition(&mut tx, &transition).await?;

        tx.commit().await.map_err(|e| classify_sqlx_error(&e))?;

        agent.status = to_state;
        agent.last_activity_at = now;

        self.event_bus
            .publish(LifecycleEvent::from_transition(&transition))
            .await;

        Ok(agent)
    }

    /// Update only `current_task_id`, enforcing the §3 invariants for the
    /// agent's current status.
    pub async fn update_agent_task(&self, id: &str, task_id: Option<&str>) -> CoreResult<Agent> {
        let mut tx = self.pool.begin().await.map_err(|e| classify_sqlx_error(&e))?;
        let mut agent = fetch_agent(&mut tx, id).await?.ok_or_else(|| CoreError::EntityNotFound {
            entity: "agent".to_string(),
            id: id.to_string(),
        })?;

        match agent.status {
            AgentStatus::Spawning | AgentStatus::Idle if task_id.is_some() => {
                return Err(CoreError::ConstraintViolation(format!(
                    "agent {id} cannot hold a task while {}",
                    agent.status.as_str()
                )));
            }
            AgentStatus::Active | AgentStatus::Waiting if task_id.is_none() => {
                return Err(CoreError::ConstraintViolation(format!(
                    "agent {id} must hold a task while {}",
                    agent.status.as_str()
                )));
            }
            _ => {}
        }

        sqlx::query("UPDATE agents SET current_task_id = ? WHERE id = ?")
            .bind(task_id)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        tx.commit().await.map_err(|e| classify_sqlx_error(&e))?;

        agent.current_task_id = task_id.map(str::to_string);
        Ok(agent)
    }

    /// Bump `last_activity_at` without writing a transition row.
    pub async fn heartbeat(&self, id: &str) -> CoreResult<()> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query("UPDATE agents SET last_activity_at = ? WHERE id = ?")
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        if result.rows_affected() == 0 {
            return Err(CoreError::EntityNotFound { entity: "agent".to_string(), id: id.to_string() });
        }
        Ok(())
    }

    pub async fn get_agent(&self, id: &str) -> CoreResult<Option<Agent>> {
        let mut conn = self.pool.acquire().await.map_err(|e| classify_sqlx_error(&e))?;
        fetch_agent_conn(&mut conn, id).await
    }

    pub async fn get_agents_by_status(&self, status: AgentStatus) -> CoreResult<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents WHERE status = ? ORDER BY spawned_at ASC")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        rows.iter().map(row_to_agent).collect()
    }

    pub async fn get_active_agents(&self) -> CoreResult<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents WHERE status != 'terminated' ORDER BY spawned_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        rows.iter().map(row_to_agent).collect()
    }

    /// History ordered by `timestamp ASC` — monotone non-decreasing per
    /// spec.md Testable Property 4.
    pub async fn get_agent_history(&self, id: &str, limit: Option<i64>) -> CoreResult<Vec<StateTransition>> {
        let limit = limit.unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT * FROM state_transitions WHERE entity_type = 'agent' AND entity_id = ? ORDER BY timestamp ASC LIMIT ?",
        )
        .bind(id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify_sqlx_error(&e))?;
        rows.iter().map(row_to_transition).collect()
    }

    /// Time-in-state and trigger counts, computed by summing adjacent
    /// transition timestamps (spec.md §4.D).
    pub async fn get_agent_statistics(&self, id: &str) -> CoreResult<AgentStatistics> {
        let history = self.get_agent_history(id, None).await?;
        let mut stats = AgentStatistics::default();

        for window in history.windows(2) {
            let [from, to] = window else { continue };
            let seconds = (to.timestamp - from.timestamp).num_seconds();
            *stats.time_in_state_seconds.entry(from.to_state.clone()).or_insert(0) += seconds;
        }
        // The final (possibly only) state is open-ended; attribute elapsed
        // time since its transition to "now" for display purposes.
        if let Some(last) = history.last() {
            let seconds = (Utc::now() - last.timestamp).num_seconds().max(0);
            *stats.time_in_state_seconds.entry(last.to_state.clone()).or_insert(0) += seconds;
        }

        for transition in &history {
            *stats.transition_counts_by_trigger.entry(transition.trigger.as_str().to_string()).or_insert(0) += 1;
        }
        stats.total_transitions = history.len() as u32;

        Ok(stats)
    }

    /// Soft-delete: transition to `Terminated` with `UserAction`.
    pub async fn delete_agent(&self, id: &str, reason: &str) -> CoreResult<Agent> {
        self.update_agent_state(
            id,
            AgentStatus::Terminated,
            TransitionTrigger::UserAction,
            Some(serde_json::json!({ "reason": reason })),
        )
        .await
    }

    /// Remove the agent row and its transitions entirely. Test/admin only.
    pub async fn hard_delete_agent(&self, id: &str) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| classify_sqlx_error(&e))?;
        sqlx::query("DELETE FROM state_transitions WHERE entity_type = 'agent' AND entity_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        tx.commit().await.map_err(|e| classify_sqlx_error(&e))
    }

    // ---- Task operations ---------------------------------------------------

    pub async fn create_task(&self, task: &Task) -> CoreResult<()> {
        task.validate().map_err(|e| CoreError::ValidationError(vec![e]))?;
        sqlx::query(
            "INSERT INTO tasks (id, phase_id, status, assigned_agent, required_domain, priority, start_time, completion_time, execution_type, memory_log_path, metadata_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id)
        .bind(&task.phase_id)
        .bind(task.status.as_str())
        .bind(&task.assigned_agent)
        .bind(task.required_domain.map(AgentDomain::as_str))
        .bind(task.priority)
        .bind(task.start_time.map(|t| t.to_rfc3339()))
        .bind(task.completion_time.map(|t| t.to_rfc3339()))
        .bind(&task.execution_type.0)
        .bind(&task.memory_log_path)
        .bind(task.metadata.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| classify_sqlx_error(&e))?;
        Ok(())
    }

    /// Validate and apply a task state transition, assigning/clearing
    /// `assigned_agent`/`start_time`/`completion_time` per §3 and writing
    /// the transition row.
    pub async fn update_task_state(
        &self,
        id: &str,
        to_state: TaskStatus,
        trigger: TransitionTrigger,
        assigned_agent: Option<&str>,
    ) -> CoreResult<Task> {
        let mut tx = self.pool.begin().await.map_err(|e| classify_sqlx_error(&e))?;
        let mut task = fetch_task(&mut tx, id).await?.ok_or_else(|| CoreError::EntityNotFound {
            entity: "task".to_string(),
            id: id.to_string(),
        })?;

        validate_task_transition(id, task.status, to_state)?;

        let now = Utc::now();
        let (start_time, completion_time) = match to_state {
            TaskStatus::Assigned => (task.start_time, task.completion_time),
            TaskStatus::InProgress if task.start_time.is_none() => (Some(now), None),
            TaskStatus::InProgress | TaskStatus::Blocked => (task.start_time, None),
            TaskStatus::Completed | TaskStatus::Failed => (task.start_time, Some(now)),
            TaskStatus::Pending => (None, None),
        };

        let agent_to_store = match to_state {
            TaskStatus::Pending => None,
            _ => assigned_agent.map(str::to_string).or_else(|| task.assigned_agent.clone()),
        };

        sqlx::query(
            "UPDATE tasks SET status = ?, assigned_agent = ?, start_time = ?, completion_time = ? WHERE id = ?",
        )
        .bind(to_state.as_str())
        .bind(&agent_to_store)
        .bind(start_time.map(|t| t.to_rfc3339()))
        .bind(completion_time.map(|t| t.to_rfc3339()))
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_sqlx_error(&e))?;

        let transition = StateTransition::transition(
            Uuid::new_v4().to_string(),
            EntityType::Task,
            id,
            task.status.as_str(),
            to_state.as_str(),
            trigger,
            now,
        );
        insert_transition(&mut tx, &transition).await?;
        tx.commit().await.map_err(|e| classify_sqlx_error(&e))?;

        task.status = to_state;
        task.assigned_agent = agent_to_store;
        task.start_time = start_time;
        task.completion_time = completion_time;

        self.event_bus.publish(LifecycleEvent::from_transition(&transition)).await;
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> CoreResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        row.as_ref().map(row_to_task).transpose()
    }

    pub async fn get_tasks_by_status(&self, status: TaskStatus) -> CoreResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE status = ? ORDER BY priority DESC, id ASC")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        rows.iter().map(row_to_task).collect()
    }

    pub async fn get_all_tasks(&self) -> CoreResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        rows.iter().map(row_to_task).collect()
    }

    // ---- Task dependency operations ----------------------------------------

    /// Insert a dependency edge. Duplicate `(task_id, depends_on_task_id)`
    /// pairs fail with `ConstraintViolation`.
    pub async fn add_task_dependency(&self, dependency: &TaskDependency) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO task_dependencies (task_id, depends_on_task_id, dependency_type, description)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&dependency.task_id)
        .bind(&dependency.depends_on_task_id)
        .bind(dependency.dependency_type.as_str())
        .bind(&dependency.description)
        .execute(&self.pool)
        .await
        .map_err(|e| classify_sqlx_error(&e))?;
        Ok(())
    }

    pub async fn get_task_dependencies(&self, task_id: &str) -> CoreResult<Vec<TaskDependency>> {
        let rows = sqlx::query("SELECT * FROM task_dependencies WHERE task_id = ?")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        rows.iter().map(row_to_task_dependency).collect()
    }

    pub async fn get_all_task_dependencies(&self) -> CoreResult<Vec<TaskDependency>> {
        let rows = sqlx::query("SELECT * FROM task_dependencies")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        rows.iter().map(row_to_task_dependency).collect()
    }

    pub async fn remove_task_dependency(&self, task_id: &str, depends_on_task_id: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM task_dependencies WHERE task_id = ? AND depends_on_task_id = ?")
            .bind(task_id)
            .bind(depends_on_task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        Ok(())
    }

    // ---- Session operations -------------------------------------------------

    pub async fn create_session(&self, session: &Session) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO sessions (id, project_id, status, start_time, pause_time, end_time, metadata_json)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.project_id)
        .bind(session.status.as_str())
        .bind(session.start_time.to_rfc3339())
        .bind(session.pause_time.map(|t| t.to_rfc3339()))
        .bind(session.end_time.map(|t| t.to_rfc3339()))
        .bind(session.metadata.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| classify_sqlx_error(&e))?;
        Ok(())
    }

    pub async fn update_session_status(&self, id: &str, status: SessionStatus) -> CoreResult<Session> {
        let now = Utc::now();
        let (pause_time, end_time): (Option<String>, Option<String>) = match status {
            SessionStatus::Paused => (Some(now.to_rfc3339()), None),
            SessionStatus::Completed | SessionStatus::Failed => (None, Some(now.to_rfc3339())),
            SessionStatus::Initializing | SessionStatus::Running => (None, None),
        };

        let result = sqlx::query(
            "UPDATE sessions SET status = ?, pause_time = COALESCE(?, pause_time), end_time = COALESCE(?, end_time) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(&pause_time)
        .bind(&end_time)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| classify_sqlx_error(&e))?;
        if result.rows_affected() == 0 {
            return Err(CoreError::EntityNotFound { entity: "session".to_string(), id: id.to_string() });
        }

        self.get_session(id).await?.ok_or_else(|| CoreError::EntityNotFound { entity: "session".to_string(), id: id.to_string() })
    }

    pub async fn get_session(&self, id: &str) -> CoreResult<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        row.as_ref().map(row_to_session).transpose()
    }

    /// Record a point-in-time checkpoint for `session_id` (spec.md §4.F's
    /// "restore context from the last session checkpoint" plug-in point).
    pub async fn create_checkpoint(&self, checkpoint: &SessionCheckpoint) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO session_checkpoints (id, session_id, timestamp, description, active_agents_json, completed_tasks_json, in_progress_tasks_json, metadata_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.id)
        .bind(&checkpoint.session_id)
        .bind(checkpoint.timestamp.to_rfc3339())
        .bind(&checkpoint.description)
        .bind(serde_json::to_string(&checkpoint.active_agents).unwrap_or_default())
        .bind(serde_json::to_string(&checkpoint.completed_tasks).unwrap_or_default())
        .bind(serde_json::to_string(&checkpoint.in_progress_tasks).unwrap_or_default())
        .bind(checkpoint.metadata.as_ref().map(serde_json::Value::to_string))
        .execute(&self.pool)
        .await
        .map_err(|e| classify_sqlx_error(&e))?;
        Ok(())
    }

    /// The most recent checkpoint for `session_id`, if any.
    pub async fn latest_checkpoint(&self, session_id: &str) -> CoreResult<Option<SessionCheckpoint>> {
        let row = sqlx::query("SELECT * FROM session_checkpoints WHERE session_id = ? ORDER BY timestamp DESC LIMIT 1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error(&e))?;
        row.as_ref().map(row_to_checkpoint).transpose()
    }
}

async fn insert_transition(tx: &mut Transaction<'_, Sqlite>, transition: &StateTransition) -> CoreResult<()> {
    sqlx::query(
        "INSERT INTO state_transitions (id, entity_type, entity_id, from_state, to_state, timestamp, trigger, metadata_json)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&transition.id)
    .bind(transition.entity_type.as_str())
    .bind(&transition.entity_id)
    .bind(&transition.from_state)
    .bind(&transition.to_state)
    .bind(transition.timestamp.to_rfc3339())
    .bind(transition.trigger.as_str())
    .bind(transition.metadata.as_ref().map(serde_json::Value::to_string))
    .execute(&mut **tx)
    .await
    .map_err(|e| classify_sqlx_error(&e))?;
    Ok(())
}

async fn fetch_agent(tx: &mut Transaction<'_, Sqlite>, id: &str) -> CoreResult<Option<Agent>> {
    let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| classify_sqlx_error(&e))?;
    row.as_ref().map(row_to_agent).transpose()
}

async fn fetch_agent_conn(conn: &mut sqlx::pool::PoolConnection<Sqlite>, id: &str) -> CoreResult<Option<Agent>> {
    let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut **conn)
        .await
        .map_err(|e| classify_sqlx_error(&e))?;
    row.as_ref().map(row_to_agent).transpose()
}

async fn fetch_task(tx: &mut Transaction<'_, Sqlite>, id: &str) -> CoreResult<Option<Task>> {
    let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| classify_sqlx_error(&e))?;
    row.as_ref().map(row_to_task).transpose()
}

fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Agent> {
    let status_raw: String = row.try_get("status").map_err(|e| classify_sqlx_error(&e))?;
    let type_raw: String = row.try_get("agent_type").map_err(|e| classify_sqlx_error(&e))?;
    let domain_raw: Option<String> = row.try_get("domain").map_err(|e| classify_sqlx_error(&e))?;
    let metadata_raw: String = row.try_get("metadata_json").map_err(|e| classify_sqlx_error(&e))?;
    let spawned_raw: String = row.try_get("spawned_at").map_err(|e| classify_sqlx_error(&e))?;
    let activity_raw: String = row.try_get("last_activity_at").map_err(|e| classify_sqlx_error(&e))?;

    Ok(Agent {
        id: row.try_get("id").map_err(|e| classify_sqlx_error(&e))?,
        agent_type: AgentType::parse_str(&type_raw)
            .ok_or_else(|| CoreError::ValidationError(vec![format!("agent.agent_type: unrecognized {type_raw}")]))?,
        status: AgentStatus::parse_str(&status_raw)
            .ok_or_else(|| CoreError::ValidationError(vec![format!("agent.status: unrecognized {status_raw}")]))?,
        current_task_id: row.try_get("current_task_id").map_err(|e| classify_sqlx_error(&e))?,
        domain: domain_raw.as_deref().and_then(AgentDomain::parse_str),
        spawned_at: parse_timestamp(&spawned_raw)?,
        last_activity_at: parse_timestamp(&activity_raw)?,
        process_id: row
            .try_get::<Option<i64>, _>("process_id")
            .map_err(|e| classify_sqlx_error(&e))?
            .map(|v| v as u32),
        worktree_path: row.try_get("worktree_path").map_err(|e| classify_sqlx_error(&e))?,
        metadata: serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Task> {
    let status_raw: String = row.try_get("status").map_err(|e| classify_sqlx_error(&e))?;
    let domain_raw: Option<String> = row.try_get("required_domain").map_err(|e| classify_sqlx_error(&e))?;
    let metadata_raw: String = row.try_get("metadata_json").map_err(|e| classify_sqlx_error(&e))?;
    let start_raw: Option<String> = row.try_get("start_time").map_err(|e| classify_sqlx_error(&e))?;
    let completion_raw: Option<String> = row.try_get("completion_time").map_err(|e| classify_sqlx_error(&e))?;
    let execution_type: String = row.try_get("execution_type").map_err(|e| classify_sqlx_error(&e))?;

    Ok(Task {
        id: row.try_get("id").map_err(|e| classify_sqlx_error(&e))?,
        phase_id: row.try_get("phase_id").map_err(|e| classify_sqlx_error(&e))?,
        status: TaskStatus::parse_str(&status_raw)
            .ok_or_else(|| CoreError::ValidationError(vec![format!("task.status: unrecognized {status_raw}")]))?,
        assigned_agent: row.try_get("assigned_agent").map_err(|e| classify_sqlx_error(&e))?,
        required_domain: domain_raw.as_deref().and_then(AgentDomain::parse_str),
        priority: row.try_get("priority").map_err(|e| classify_sqlx_error(&e))?,
        start_time: start_raw.as_deref().map(parse_timestamp).transpose()?,
        completion_time: completion_raw.as_deref().map(parse_timestamp).transpose()?,
        execution_type: crate::domain::models::ExecutionType(execution_type),
        memory_log_path: row.try_get("memory_log_path").map_err(|e| classify_sqlx_error(&e))?,
        metadata: serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_transition(row: &sqlx::sqlite::SqliteRow) -> CoreResult<StateTransition> {
    let entity_type_raw: String = row.try_get("entity_type").map_err(|e| classify_sqlx_error(&e))?;
    let trigger_raw: String = row.try_get("trigger").map_err(|e| classify_sqlx_error(&e))?;
    let timestamp_raw: String = row.try_get("timestamp").map_err(|e| classify_sqlx_error(&e))?;
    let metadata_raw: Option<String> = row.try_get("metadata_json").map_err(|e| classify_sqlx_error(&e))?;

    Ok(StateTransition {
        id: row.try_get("id").map_err(|e| classify_sqlx_error(&e))?,
        entity_type: EntityType::parse_str(&entity_type_raw)
            .ok_or_else(|| CoreError::ValidationError(vec!["transition.entity_type: unrecognized".to_string()]))?,
        entity_id: row.try_get("entity_id").map_err(|e| classify_sqlx_error(&e))?,
        from_state: row.try_get("from_state").map_err(|e| classify_sqlx_error(&e))?,
        to_state: row.try_get("to_state").map_err(|e| classify_sqlx_error(&e))?,
        timestamp: parse_timestamp(&timestamp_raw)?,
        trigger: TransitionTrigger::parse_str(&trigger_raw)
            .ok_or_else(|| CoreError::ValidationError(vec!["transition.trigger: unrecognized".to_string()]))?,
        metadata: metadata_raw.and_then(|m| serde_json::from_str(&m).ok()),
    })
}

fn row_to_task_dependency(row: &sqlx::sqlite::SqliteRow) -> CoreResult<TaskDependency> {
    let dependency_type_raw: String = row.try_get("dependency_type").map_err(|e| classify_sqlx_error(&e))?;
    Ok(TaskDependency {
        task_id: row.try_get("task_id").map_err(|e| classify_sqlx_error(&e))?,
        depends_on_task_id: row.try_get("depends_on_task_id").map_err(|e| classify_sqlx_error(&e))?,
        dependency_type: DependencyType::parse_str(&dependency_type_raw)
            .ok_or_else(|| CoreError::ValidationError(vec!["task_dependency.dependency_type: unrecognized".to_string()]))?,
        description: row.try_get("description").map_err(|e| classify_sqlx_error(&e))?,
    })
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> CoreResult<Session> {
    let status_raw: String = row.try_get("status").map_err(|e| classify_sqlx_error(&e))?;
    let start_raw: String = row.try_get("start_time").map_err(|e| classify_sqlx_error(&e))?;
    let pause_raw: Option<String> = row.try_get("pause_time").map_err(|e| classify_sqlx_error(&e))?;
    let end_raw: Option<String> = row.try_get("end_time").map_err(|e| classify_sqlx_error(&e))?;
    let metadata_raw: String = row.try_get("metadata_json").map_err(|e| classify_sqlx_error(&e))?;

    Ok(Session {
        id: row.try_get("id").map_err(|e| classify_sqlx_error(&e))?,
        project_id: row.try_get("project_id").map_err(|e| classify_sqlx_error(&e))?,
        status: SessionStatus::parse_str(&status_raw)
            .ok_or_else(|| CoreError::ValidationError(vec![format!("session.status: unrecognized {status_raw}")]))?,
        start_time: parse_timestamp(&start_raw)?,
        pause_time: pause_raw.as_deref().map(parse_timestamp).transpose()?,
        end_time: end_raw.as_deref().map(parse_timestamp).transpose()?,
        metadata: serde_json::from_str(&metadata_raw).unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> CoreResult<SessionCheckpoint> {
    let timestamp_raw: String = row.try_get("timestamp").map_err(|e| classify_sqlx_error(&e))?;
    let active_agents_raw: String = row.try_get("active_agents_json").map_err(|e| classify_sqlx_error(&e))?;
    let completed_raw: String = row.try_get("completed_tasks_json").map_err(|e| classify_sqlx_error(&e))?;
    let in_progress_raw: String = row.try_get("in_progress_tasks_json").map_err(|e| classify_sqlx_error(&e))?;
    let metadata_raw: Option<String> = row.try_get("metadata_json").map_err(|e| classify_sqlx_error(&e))?;

    Ok(SessionCheckpoint {
        id: row.try_get("id").map_err(|e| classify_sqlx_error(&e))?,
        session_id: row.try_get("session_id").map_err(|e| classify_sqlx_error(&e))?,
        timestamp: parse_timestamp(&timestamp_raw)?,
        description: row.try_get("description").map_err(|e| classify_sqlx_error(&e))?,
        active_agents: serde_json::from_str(&active_agents_raw).unwrap_or_default(),
        completed_tasks: serde_json::from_str(&completed_raw).unwrap_or_default(),
        in_progress_tasks: serde_json::from_str(&in_progress_raw).unwrap_or_default(),
        metadata: metadata_raw.and_then(|m| serde_json::from_str(&m).ok()),
    })
}

fn parse_timestamp(raw: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::ValidationError(vec![format!("timestamp: {e}")]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::bus::EventBus;
    use crate::storage::migrate::run_migrations;
    use crate::storage::pool::create_test_pool;

    async fn setup() -> PersistenceManager {
        let pool = create_test_pool().await.expect("pool");
        run_migrations(&pool).await.expect("migrate");
        PersistenceManager::new(pool, Arc::new(EventBus::new(1000)))
    }

    #[tokio::test]
    async fn s1_happy_path_lifecycle() {
        let manager = setup().await;

        let agent = manager
            .create_agent("a1", AgentType::Implementation, Some(AgentDomain::Foundation), serde_json::json!({}))
            .await
            .expect("create");
        assert_eq!(agent.status, AgentStatus::Spawning);
        assert_eq!(manager.get_agent_history("a1", None).await.unwrap().len(), 1);

        manager
            .update_agent_state("a1", AgentStatus::Active, TransitionTrigger::Automatic, None)
            .await
            .expect("spawning->active");

        manager.update_agent_task("a1", Some("1.1")).await.expect("assign task");

        let rejected = manager
            .update_agent_state("a1", AgentStatus::Idle, TransitionTrigger::Automatic, None)
            .await;
        assert!(rejected.is_err(), "active->idle with a task must be rejected");

        manager.update_agent_task("a1", None).await.expect("clear task");
        manager
            .update_agent_state("a1", AgentStatus::Idle, TransitionTrigger::Automatic, None)
            .await
            .expect("active->idle once cleared");

        manager
            .update_agent_state("a1", AgentStatus::Terminated, TransitionTrigger::UserAction, None)
            .await
            .expect("idle->terminated");

        let history = manager.get_agent_history("a1", None).await.unwrap();
        let states: Vec<&str> = history.iter().map(|t| t.to_state.as_str()).collect();
        assert_eq!(states, vec!["spawning", "active", "idle", "terminated"]);
    }

    #[tokio::test]
    async fn duplicate_agent_id_fails() {
        let manager = setup().await;
        manager.create_agent("a1", AgentType::Manager, None, serde_json::json!({})).await.unwrap();
        let duplicate = manager.create_agent("a1", AgentType::Manager, None, serde_json::json!({})).await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn task_blocked_cannot_complete_directly() {
        let manager = setup().await;
        let mut task = Task::new_pending("1.1", "1");
        task.status = TaskStatus::Pending;
        manager.create_task(&task).await.unwrap();

        manager
            .update_task_state("1.1", TaskStatus::Assigned, TransitionTrigger::Automatic, Some("a1"))
            .await
            .unwrap();
        manager
            .update_task_state("1.1", TaskStatus::InProgress, TransitionTrigger::Automatic, None)
            .await
            .unwrap();
        manager
            .update_task_state("1.1", TaskStatus::Blocked, TransitionTrigger::Dependency, None)
            .await
            .unwrap();

        let rejected = manager
            .update_task_state("1.1", TaskStatus::Completed, TransitionTrigger::Automatic, None)
            .await;
        assert!(rejected.is_err());

        manager
            .update_task_state("1.1", TaskStatus::InProgress, TransitionTrigger::Automatic, None)
            .await
            .unwrap();
        let completed = manager
            .update_task_state("1.1", TaskStatus::Completed, TransitionTrigger::Automatic, None)
            .await
            .unwrap();
        assert!(completed.completion_time.unwrap() >= completed.start_time.unwrap());
    }

    #[tokio::test]
    async fn history_is_monotone_non_decreasing() {
        let manager = setup().await;
        manager.create_agent("a1", AgentType::Manager, None, serde_json::json!({})).await.unwrap();
        manager
            .update_agent_state("a1", AgentStatus::Active, TransitionTrigger::Automatic, None)
            .await
            .unwrap();
        manager
            .update_agent_state("a1", AgentStatus::Waiting, TransitionTrigger::Automatic, None)
            .await
            .unwrap();

        let history = manager.get_agent_history("a1", None).await.unwrap();
        for window in history.windows(2) {
            assert!(window[1].timestamp >= window[0].timestamp);
        }
    }
}
