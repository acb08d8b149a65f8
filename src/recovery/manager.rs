//! Recovery manager: heartbeat monitor and bounded crash recovery
//! (spec.md §4.F).
//!
//! The monitor tick is grounded in the ticker-task shape of the teacher's
//! `services/swarm_orchestrator/agent_lifecycle.rs` monitor loop (scheduled
//! interval, cooperative shutdown via a notify flag rather than a raw
//! `loop { sleep }`). The respawn step is deliberately a plug-in
//! (`RespawnCollaborator`) rather than a direct `spawn::wrapper` call,
//! matching spec.md §4.F's "both are plug-in points, not part of the core
//! contract".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::domain::errors::CoreResult;
use crate::domain::models::{AgentStatus, EntityType, TransitionTrigger};
use crate::events::bus::{EventBus, LifecycleEvent};
use crate::persistence::PersistenceManager;

/// Restores a crashed agent: relaunches the worker process and restores
/// context from the last session checkpoint. Not part of the core contract
/// (spec.md §4.F) — supplied by the orchestration layer.
#[async_trait]
pub trait RespawnCollaborator: Send + Sync {
    /// On success, returns the id of the (possibly new) agent now running
    /// in place of `agent_id`.
    async fn respawn(&self, agent_id: &str, crash_reason: &str) -> Result<String, String>;
}

#[derive(Debug, Clone, Copy)]
pub struct RecoveryConfig {
    pub monitoring_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub auto_recovery: bool,
    pub max_retry_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            monitoring_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(60),
            auto_recovery: true,
            max_retry_attempts: 3,
            retry_base_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RecoveryStats {
    pub total_crashes: u64,
    pub total_attempts: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    total_recovery_seconds: f64,
}

impl RecoveryStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successful_recoveries as f64 / self.total_attempts as f64
        }
    }

    pub fn average_recovery_time_seconds(&self) -> f64 {
        let completed = self.successful_recoveries + self.failed_recoveries;
        if completed == 0 {
            0.0
        } else {
            self.total_recovery_seconds / completed as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub error: Option<String>,
}

pub struct RecoveryManager<C: RespawnCollaborator> {
    persistence: Arc<PersistenceManager>,
    event_bus: Arc<EventBus>,
    collaborator: C,
    config: RecoveryConfig,
    attempts: RwLock<HashMap<String, u32>>,
    stats: Mutex<RecoveryStats>,
    stop: Notify,
}

impl<C: RespawnCollaborator> RecoveryManager<C> {
    pub fn new(persistence: Arc<PersistenceManager>, event_bus: Arc<EventBus>, collaborator: C, config: RecoveryConfig) -> Self {
        Self {
            persistence,
            event_bus,
            collaborator,
            config,
            attempts: RwLock::new(HashMap::new()),
            stats: Mutex::new(RecoveryStats::default()),
            stop: Notify::new(),
        }
    }

    pub async fn stats(&self) -> RecoveryStats {
        self.stats.lock().await.clone()
    }

    /// Cancel a running `run` loop. Idempotent: calling it with nothing
    /// listening is a harmless no-op notify.
    pub fn stop(&self) {
        self.stop.notify_waiters();
    }

    /// Runs the monitor loop until `stop()` is called.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.monitoring_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::warn!(error = %err, "recovery monitor tick failed");
                    }
                }
                _ = self.stop.notified() => break,
            }
        }
    }

    /// One monitoring pass (spec.md §4.F steps 1-3).
    pub async fn tick(&self) -> CoreResult<()> {
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(self.config.heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let mut crashed = Vec::new();
        for status in [AgentStatus::Active, AgentStatus::Waiting] {
            for agent in self.persistence.get_agents_by_status(status).await? {
                if now - agent.last_activity_at > timeout {
                    crashed.push(agent);
                }
            }
        }

        for agent in crashed {
            let seconds = (now - agent.last_activity_at).num_seconds();
            let reason = format!("no heartbeat for {seconds} seconds");
            {
                let mut stats = self.stats.lock().await;
                stats.total_crashes += 1;
            }
            if self.config.auto_recovery {
                self.attempt_recovery(&agent.id, &reason).await;
            }
        }
        Ok(())
    }

    /// Attempt to recover `agent_id`, which has just been detected as
    /// crashed with `crash_reason` (spec.md §4.F `attemptRecovery`).
    pub async fn attempt_recovery(&self, agent_id: &str, crash_reason: &str) -> RecoveryOutcome {
        let k = {
            let counters = self.attempts.read().await;
            counters.get(agent_id).copied().unwrap_or(0)
        };

        if k >= self.config.max_retry_attempts {
            let _ = self
                .persistence
                .update_agent_state(
                    agent_id,
                    AgentStatus::Terminated,
                    TransitionTrigger::Error,
                    Some(serde_json::json!({ "reason": crash_reason, "recoveryFailed": true })),
                )
                .await;
            // Testable Property 8: failedRecoveries increments exactly once
            // per max-attempts exhaustion, not once per failed attempt.
            self.stats.lock().await.failed_recoveries += 1;
            self.emit(agent_id, "recovery_escalated", Some(serde_json::json!({ "reason": crash_reason }))).await;
            return RecoveryOutcome { success: false, error: Some("max attempts exceeded".to_string()) };
        }

        {
            let mut counters = self.attempts.write().await;
            *counters.entry(agent_id.to_string()).or_insert(0) += 1;
        }
        {
            let mut stats = self.stats.lock().await;
            stats.total_attempts += 1;
        }

        // Terminated is absorbing (state_machine.rs): a prior attempt may
        // already have marked this agent Terminated, in which case
        // re-issuing the same transition would be rejected and short-circuit
        // every attempt after the first. Only mark it when it isn't already.
        let already_terminated = matches!(
            self.persistence.get_agent(agent_id).await,
            Ok(Some(agent)) if agent.status == AgentStatus::Terminated
        );
        if !already_terminated
            && self
                .persistence
                .update_agent_state(
                    agent_id,
                    AgentStatus::Terminated,
                    TransitionTrigger::Error,
                    Some(serde_json::json!({ "crashReason": crash_reason })),
                )
                .await
                .is_err()
        {
            return RecoveryOutcome { success: false, error: Some("failed to mark agent terminated".to_string()) };
        }

        if k >= 2 {
            let delay = self.config.retry_base_delay * 2u32.pow(k - 1);
            tokio::time::sleep(delay).await;
        }

        let started = Instant::now();
        let outcome = match self.collaborator.respawn(agent_id, crash_reason).await {
            Ok(_new_agent_id) => {
                self.attempts.write().await.insert(agent_id.to_string(), 0);
                self.emit(agent_id, "recovery_succeeded", None).await;
                RecoveryOutcome { success: true, error: None }
            }
            Err(reason) => {
                self.emit(agent_id, "recovery_failed", Some(serde_json::json!({ "reason": reason }))).await;
                RecoveryOutcome { success: false, error: Some(reason) }
            }
        };

        // A failed individual attempt (with attempts remaining) only emits
        // `recovery-failed`; `failedRecoveries` itself is reserved for the
        // max-attempts-exhausted branch above (Testable Property 8).
        if outcome.success {
            let elapsed = started.elapsed().as_secs_f64();
            let mut stats = self.stats.lock().await;
            stats.total_recovery_seconds += elapsed;
            stats.successful_recoveries += 1;
        }

        outcome
    }

    async fn emit(&self, agent_id: &str, label: &str, metadata: Option<serde_json::Value>) {
        self.event_bus
            .publish(LifecycleEvent {
                sequence: 0,
                entity_type: EntityType::Agent,
                entity_id: agent_id.to_string(),
                from_state: AgentStatus::Terminated.as_str().to_string(),
                to_state: label.to_string(),
                timestamp: Utc::now(),
                trigger: TransitionTrigger::Recovery,
                metadata,
            })
            .await;
    }
}
