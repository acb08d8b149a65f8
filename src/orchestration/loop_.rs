//! `OrchestrationLoop` — the six-step tick of spec.md §4.J.
//!
//! Grounded in the teacher's `services/swarm_orchestrator/mod.rs` +
//! `dag_execution.rs` (ready-set refresh, agent pick, spawn-and-track shape)
//! narrowed to spec.md's exact tick. The template-rendering engine and the
//! external agent CLI are named out-of-scope collaborators (spec.md §1); the
//! loop only depends on their thin contracts (`PromptRenderer`,
//! [`crate::spawn::WorkerSpawner`]).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{AgentStatus, AgentType, TaskStatus, TransitionTrigger};
use crate::events::bus::EventBus;
use crate::persistence::PersistenceManager;
use crate::plan::dependency_resolver::DependencyGraph;
use crate::plan::parser::ParsedPlan;
use crate::progress::header::{ProgressDocument, ProgressHeader};
use crate::progress::{CompletionReporter, ErrorEscalator, ProgressMonitor};
use crate::spawn::wrapper::{SpawnOptions, SpawnRetryPolicy, WorkerSpawner};

use super::domain_map::{map_agent_assignment_to_domain, memory_log_path};

/// Everything the out-of-scope template engine needs to render a task
/// assignment prompt (spec.md §4.J step 4): the plan's task metadata, the
/// phase title, normalised dependencies, and the computed memory-log path.
#[derive(Debug, Clone)]
pub struct AssignmentPromptContext {
    pub task_id: String,
    pub title: String,
    pub phase_title: String,
    pub objective: String,
    pub output: String,
    pub guidance: String,
    pub dependencies: Vec<String>,
    pub memory_log_path: String,
}

/// Thin contract for the out-of-scope template-rendering engine (spec.md §1:
/// "the template-rendering engine that produces prompt text" is a named
/// collaborator, not part of the core).
#[async_trait]
pub trait PromptRenderer: Send + Sync {
    async fn render(&self, ctx: &AssignmentPromptContext) -> Result<String, String>;
}

#[derive(Debug, Clone)]
pub struct OrchestrationLoopConfig {
    /// Base directory for memory logs (spec.md §6: `./.apm/Memory`).
    pub memory_log_base: String,
    /// Exclude agents that are busy-without-capacity from candidate
    /// selection (spec.md §4.J step 3).
    pub exclude_busy: bool,
    pub spawn_options: SpawnOptions,
    pub spawn_retry: SpawnRetryPolicy,
}

impl Default for OrchestrationLoopConfig {
    fn default() -> Self {
        Self {
            memory_log_base: "./.apm/Memory".to_string(),
            exclude_busy: true,
            spawn_options: SpawnOptions::default(),
            spawn_retry: SpawnRetryPolicy::default(),
        }
    }
}

/// Outcome of a single `tick()` call.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub ready_tasks: Vec<String>,
    pub assigned: Vec<String>,
    pub unassignable: Vec<String>,
}

pub struct OrchestrationLoop<R: PromptRenderer> {
    plan: ParsedPlan,
    graph: DependencyGraph,
    persistence: Arc<PersistenceManager>,
    #[allow(dead_code)]
    event_bus: Arc<EventBus>,
    spawner: Arc<WorkerSpawner>,
    renderer: Arc<R>,
    progress_monitor: Arc<ProgressMonitor>,
    completion_reporter: Arc<CompletionReporter>,
    error_escalator: Arc<ErrorEscalator>,
    config: OrchestrationLoopConfig,
}

impl<R: PromptRenderer> OrchestrationLoop<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plan: ParsedPlan,
        persistence: Arc<PersistenceManager>,
        event_bus: Arc<EventBus>,
        spawner: Arc<WorkerSpawner>,
        renderer: Arc<R>,
        progress_monitor: Arc<ProgressMonitor>,
        completion_reporter: Arc<CompletionReporter>,
        error_escalator: Arc<ErrorEscalator>,
        config: OrchestrationLoopConfig,
    ) -> Self {
        let tasks: Vec<_> = plan.tasks.values().cloned().collect();
        let graph = DependencyGraph::build(&tasks);
        Self {
            plan,
            graph,
            persistence,
            event_bus,
            spawner,
            renderer,
            progress_monitor,
            completion_reporter,
            error_escalator,
            config,
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Run one orchestration tick (spec.md §4.J steps 1-6).
    pub async fn tick(&self) -> CoreResult<TickReport> {
        let cycles = self.graph.detect_circular_dependencies();
        if !cycles.is_empty() {
            return Err(CoreError::CycleDetected(cycles.into_iter().flatten().collect()));
        }

        let completed: HashSet<String> =
            self.persistence.get_tasks_by_status(TaskStatus::Completed).await?.into_iter().map(|t| t.id).collect();

        let mut in_progress: HashSet<String> = HashSet::new();
        for status in [TaskStatus::Assigned, TaskStatus::InProgress, TaskStatus::Blocked] {
            in_progress.extend(self.persistence.get_tasks_by_status(status).await?.into_iter().map(|t| t.id));
        }

        let ready = self.graph.get_ready_tasks(&completed, Some(&in_progress));
        let mut report = TickReport { ready_tasks: ready.clone(), ..Default::default() };

        for task_id in ready {
            match self.assign_one(&task_id).await {
                Ok(true) => report.assigned.push(task_id),
                Ok(false) => report.unassignable.push(task_id),
                Err(err) => {
                    tracing::warn!(task = %task_id, error = %err, "failed to assign ready task");
                    report.unassignable.push(task_id);
                }
            }
        }

        Ok(report)
    }

    /// Attempt to assign and spawn a worker for one ready task. Returns
    /// `Ok(false)` (not an error) when no suitable agent currently exists —
    /// the task stays `Pending` for the next tick.
    async fn assign_one(&self, task_id: &str) -> CoreResult<bool> {
        let parsed = self.plan.tasks.get(task_id).ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))?;
        let domain = parsed.agent_assignment.as_deref().map(map_agent_assignment_to_domain);

        let Some(agent) = self.select_agent(domain).await? else {
            return Ok(false);
        };

        let phase_title = self
            .plan
            .phases
            .iter()
            .find(|p| p.number.to_string() == parsed.phase)
            .map(|p| p.title.clone())
            .unwrap_or_default();
        let phase_number: u32 = parsed.phase.parse().unwrap_or(0);
        let log_path = memory_log_path(&self.config.memory_log_base, phase_number, &phase_title, task_id, &parsed.title);

        let dependencies: Vec<String> = parsed.dependencies.iter().map(|d| d.depends_on_task_id.clone()).collect();
        let ctx = AssignmentPromptContext {
            task_id: task_id.to_string(),
            title: parsed.title.clone(),
            phase_title,
            objective: parsed.objective.clone(),
            output: parsed.output.clone(),
            guidance: parsed.guidance.clone(),
            dependencies,
            memory_log_path: log_path.clone(),
        };

        let prompt = self
            .renderer
            .render(&ctx)
            .await
            .map_err(|e| CoreError::ValidationError(vec![format!("prompt render failed: {e}")]))?;

        self.persistence.update_task_state(task_id, TaskStatus::Assigned, TransitionTrigger::Dependency, Some(&agent.id)).await?;
        self.persistence.update_agent_task(&agent.id, Some(task_id)).await?;

        self.init_progress_file(&agent.id, task_id, &log_path).await?;

        let handle = self.spawner.spawn_with_retry(&prompt, &self.config.spawn_options, self.config.spawn_retry).await?;
        tracing::info!(task = %task_id, agent = %agent.id, pid = handle.pid, "spawned worker for task");

        self.progress_monitor.watch(task_id, &agent.id, &log_path);
        self.completion_reporter.watch(task_id, &log_path);
        self.error_escalator.watch(task_id, &log_path);

        Ok(true)
    }

    async fn init_progress_file(&self, agent_id: &str, task_id: &str, path: &str) -> CoreResult<()> {
        let header = ProgressHeader::new(agent_id, task_id);
        let document = ProgressDocument::new(header);
        if let Some(parent) = std::path::Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, document.render()).await?;
        Ok(())
    }

    /// Query available agents (spec.md §4.J step 3): `type=Implementation`,
    /// matching `domain`, not `Terminated`/`Spawning`, idle-or-without-task
    /// when `excludeBusy`. Priority `Idle > Active > Waiting > Spawning >
    /// Terminated`; ties broken by earliest `spawned_at`.
    async fn select_agent(&self, domain: Option<crate::domain::models::AgentDomain>) -> CoreResult<Option<crate::domain::models::Agent>> {
        let mut candidates = Vec::new();
        for status in [AgentStatus::Idle, AgentStatus::Active, AgentStatus::Waiting] {
            candidates.extend(self.persistence.get_agents_by_status(status).await?);
        }

        let mut eligible: Vec<_> = candidates
            .into_iter()
            .filter(|a| a.agent_type == AgentType::Implementation)
            .filter(|a| domain.is_none_or(|d| a.domain == Some(d)))
            .filter(|a| !self.config.exclude_busy || a.current_task_id.is_none())
            .collect();

        eligible.sort_by_key(|a| (priority_rank(a.status), a.spawned_at));
        Ok(eligible.into_iter().next())
    }
}

fn priority_rank(status: AgentStatus) -> u8 {
    match status {
        AgentStatus::Idle => 0,
        AgentStatus::Active => 1,
        AgentStatus::Waiting => 2,
        AgentStatus::Spawning => 3,
        AgentStatus::Terminated => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rank_orders_idle_first() {
        assert!(priority_rank(AgentStatus::Idle) < priority_rank(AgentStatus::Active));
        assert!(priority_rank(AgentStatus::Active) < priority_rank(AgentStatus::Waiting));
        assert!(priority_rank(AgentStatus::Waiting) < priority_rank(AgentStatus::Spawning));
        assert!(priority_rank(AgentStatus::Spawning) < priority_rank(AgentStatus::Terminated));
    }
}
