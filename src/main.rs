//! apm-auto CLI entry point (spec.md §6).
//!
//! Grounded in the teacher's `main.rs` (config load -> database connect ->
//! migrate -> dispatch by subcommand), narrowed to the four verbs spec.md
//! names. The template-rendering engine and the external agent CLI are
//! named out-of-scope collaborators (spec.md §1); this binary supplies the
//! minimal concrete implementations needed to drive the core end to end.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;

use apm_auto::cli::{print_status, AgentCounts, Cli, Commands, RecoveryReport, StatusReport, TaskCounts};
use apm_auto::config;
use apm_auto::domain::models::{AgentStatus, TaskStatus};
use apm_auto::events::EventBus;
use apm_auto::logging;
use apm_auto::orchestration::{AssignmentPromptContext, OrchestrationLoop, OrchestrationLoopConfig, PromptRenderer};
use apm_auto::persistence::PersistenceManager;
use apm_auto::plan;
use apm_auto::progress::{CompletionReporter, ErrorEscalator, ProgressMonitor};
use apm_auto::recovery::{RecoveryConfig, RecoveryManager, RespawnCollaborator};
use apm_auto::spawn::WorkerSpawner;
use apm_auto::storage::{create_pool, migrate::run_migrations};

/// Default plan document path, following the Agentic Project Management
/// convention this orchestrator descends from.
const DEFAULT_PLAN_PATH: &str = "./Implementation_Plan.md";

/// Formats a task-assignment prompt as plain text. Stands in for the
/// out-of-scope template-rendering engine (spec.md §1); real deployments
/// plug in a richer renderer without touching the orchestration loop.
struct PlainPromptRenderer;

#[async_trait]
impl PromptRenderer for PlainPromptRenderer {
    async fn render(&self, ctx: &AssignmentPromptContext) -> Result<String, String> {
        let deps = if ctx.dependencies.is_empty() { "(none)".to_string() } else { ctx.dependencies.join(", ") };
        Ok(format!(
            "Task {id}: {title}\nPhase: {phase}\nObjective: {objective}\nExpected output: {output}\nDependencies: {deps}\nGuidance:\n{guidance}\nRecord your progress at: {log_path}\n",
            id = ctx.task_id,
            title = ctx.title,
            phase = ctx.phase_title,
            objective = ctx.objective,
            output = ctx.output,
            guidance = ctx.guidance,
            log_path = ctx.memory_log_path,
        ))
    }
}

/// Respawns a crashed agent by relaunching the worker binary against its
/// last-known task, restoring context from the session checkpoint if one
/// exists. Both steps are plug-in points per spec.md §4.F.
struct WorkerRespawner {
    persistence: Arc<PersistenceManager>,
    spawner: Arc<WorkerSpawner>,
}

#[async_trait]
impl RespawnCollaborator for WorkerRespawner {
    async fn respawn(&self, agent_id: &str, crash_reason: &str) -> Result<String, String> {
        let agent = self
            .persistence
            .get_agent(agent_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "agent not found".to_string())?;

        let new_id = format!("{agent_id}-r{}", chrono::Utc::now().timestamp_millis());
        self.persistence
            .create_agent(&new_id, agent.agent_type, agent.domain, serde_json::json!({ "respawned_from": agent_id, "crash_reason": crash_reason }))
            .await
            .map_err(|e| e.to_string())?;

        let prompt = format!("Resume work on task {:?} after crash: {crash_reason}", agent.current_task_id);
        self.spawner
            .spawn(&prompt, &Default::default())
            .await
            .map(|_handle| new_id)
            .map_err(|e| e.to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::load().context("failed to load configuration")?;
    let _logging_guard = logging::init(&settings);

    match cli.command {
        Commands::Start { scope, dry_run } => run_start(&settings, scope, dry_run).await,
        Commands::Stop { force } => run_stop(force).await,
        Commands::Status { json } => run_status(&settings, json || cli.json).await,
        Commands::Resume => run_resume(&settings).await,
    }
}

async fn run_start(settings: &config::Settings, scope_args: Vec<String>, dry_run: bool) -> Result<()> {
    let mut cli_scope = None;
    for arg in &scope_args {
        let parsed = plan::ScopeDefinition::parse_cli_arg(arg).map_err(|e| {
            eprintln!("usage: invalid scope argument: {e}");
            std::process::exit(2);
        });
        let parsed = parsed.unwrap();
        cli_scope = Some(match cli_scope {
            None => parsed,
            Some(existing) => plan::ScopeDefinition::union(existing, parsed),
        });
    }

    let plan_text = tokio::fs::read_to_string(DEFAULT_PLAN_PATH)
        .await
        .with_context(|| format!("failed to read plan document at {DEFAULT_PLAN_PATH}"))?;
    let parsed_plan = plan::parse_plan(&plan_text).map_err(|e| anyhow::anyhow!("failed to parse plan: {e}"))?;

    let (frontmatter_scope, warnings) =
        plan::ScopeDefinition::from_frontmatter(&parsed_plan.frontmatter).map_err(|e| anyhow::anyhow!("invalid scope frontmatter: {e}"))?;
    for warning in warnings {
        tracing::warn!("{warning}");
    }
    let effective_scope = match cli_scope {
        Some(cli) => frontmatter_scope.intersect(cli),
        None => frontmatter_scope,
    };

    if dry_run {
        let in_scope: Vec<&str> = parsed_plan
            .tasks
            .keys()
            .map(String::as_str)
            .filter(|id| effective_scope.matches_task(id))
            .collect();
        println!("resolved scope matches {} task(s): {:?}", in_scope.len(), in_scope);
        return Ok(());
    }

    let pool = create_pool(&format!("sqlite:{}", settings.database_path), None).await.context("failed to connect to database")?;
    run_migrations(&pool).await.context("failed to run database migrations")?;

    let event_bus = Arc::new(EventBus::new(1000));
    let persistence = Arc::new(PersistenceManager::new(pool, event_bus.clone()));
    let spawner = Arc::new(WorkerSpawner::new("claude"));
    let renderer = Arc::new(PlainPromptRenderer);

    let progress_monitor =
        Arc::new(ProgressMonitor::with_agent_lookup(std::time::Duration::from_secs(300), persistence.clone()));
    let completion_reporter = Arc::new(CompletionReporter::new(event_bus.clone()));
    let error_escalator = Arc::new(ErrorEscalator::new(event_bus.clone()));

    let orchestration = Arc::new(OrchestrationLoop::new(
        parsed_plan,
        persistence.clone(),
        event_bus.clone(),
        spawner.clone(),
        renderer,
        progress_monitor,
        completion_reporter,
        error_escalator,
        OrchestrationLoopConfig::default(),
    ));

    let recovery = Arc::new(RecoveryManager::new(
        persistence.clone(),
        event_bus.clone(),
        WorkerRespawner { persistence: persistence.clone(), spawner },
        RecoveryConfig::default(),
    ));
    let recovery_handle = tokio::spawn(recovery.clone().run());

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match orchestration.tick().await {
                    Ok(report) if report.assigned.is_empty() && report.ready_tasks.is_empty() => {
                        tracing::info!("no ready tasks remain; orchestration loop idling");
                    }
                    Ok(report) => tracing::info!(assigned = ?report.assigned, "orchestration tick complete"),
                    Err(err) => tracing::error!(error = %err, "orchestration tick failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received shutdown signal");
                break;
            }
        }
    }

    recovery.stop();
    let _ = recovery_handle.await;
    Ok(())
}

async fn run_stop(force: bool) -> Result<()> {
    // Process control (signalling a running orchestration loop process) is
    // a thin CLI-front-end concern outside the coordination core (spec.md
    // §1); this prints the operator-facing contract the core expects.
    if force {
        println!("requested forced stop; terminate the running apm-auto process to apply it");
    } else {
        println!("requested graceful stop; send SIGINT/ctrl-c to the running apm-auto process");
    }
    Ok(())
}

async fn run_status(settings: &config::Settings, json: bool) -> Result<()> {
    let pool = create_pool(&format!("sqlite:{}", settings.database_path), None).await.context("failed to connect to database")?;
    run_migrations(&pool).await.context("failed to run database migrations")?;
    let event_bus = Arc::new(EventBus::new(1000));
    let persistence = PersistenceManager::new(pool, event_bus);

    let mut agent_counts = HashMap::new();
    let mut agent_total = 0;
    for status in [AgentStatus::Spawning, AgentStatus::Active, AgentStatus::Waiting, AgentStatus::Idle, AgentStatus::Terminated] {
        let count = persistence.get_agents_by_status(status).await?.len() as u64;
        agent_total += count;
        agent_counts.insert(status.as_str().to_string(), count);
    }

    let mut task_counts = HashMap::new();
    let mut task_total = 0;
    for status in [
        TaskStatus::Pending,
        TaskStatus::Assigned,
        TaskStatus::InProgress,
        TaskStatus::Blocked,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ] {
        let count = persistence.get_tasks_by_status(status).await?.len() as u64;
        task_total += count;
        task_counts.insert(status.as_str().to_string(), count);
    }

    let report = StatusReport {
        agents: AgentCounts { by_status: agent_counts, total: agent_total },
        tasks: TaskCounts { by_status: task_counts, total: task_total },
        current_batch_index: None,
        total_batches: None,
        recovery: RecoveryReport::default(),
    };
    print_status(&report, json);
    Ok(())
}

async fn run_resume(settings: &config::Settings) -> Result<()> {
    let pool = create_pool(&format!("sqlite:{}", settings.database_path), None).await.context("failed to connect to database")?;
    let event_bus = Arc::new(EventBus::new(1000));
    let persistence = PersistenceManager::new(pool, event_bus);

    let running = persistence.get_agents_by_status(AgentStatus::Active).await?;
    if running.is_empty() {
        println!("no paused session state found; nothing to resume");
        return Ok(());
    }
    println!("found {} active agent(s); re-run `apm-auto start` to continue driving the plan", running.len());
    Ok(())
}
