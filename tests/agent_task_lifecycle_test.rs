//! S1: happy-path lifecycle — an agent spawns, claims a task, and both
//! reach their terminal states, with a full audit trail left behind.

use apm_auto::domain::models::{AgentStatus, AgentType, Task, TaskStatus, TransitionTrigger};
use apm_auto::events::EventBus;
use apm_auto::persistence::PersistenceManager;
use apm_auto::storage::migrate::run_migrations;
use apm_auto::storage::pool::create_test_pool;
use std::sync::Arc;

async fn manager() -> PersistenceManager {
    let pool = create_test_pool().await.expect("pool");
    run_migrations(&pool).await.expect("migrate");
    PersistenceManager::new(pool, Arc::new(EventBus::new(100)))
}

#[tokio::test]
async fn agent_and_task_progress_to_terminal_states_with_history() {
    let persistence = manager().await;

    persistence.create_agent("a1", AgentType::Implementation, None, serde_json::json!({})).await.expect("create agent");
    let task = Task::new_pending("1.1", "1");
    persistence.create_task(&task).await.expect("create task");

    persistence.update_agent_state("a1", AgentStatus::Active, TransitionTrigger::Automatic, None).await.expect("spawn -> active");
    persistence.update_task_state("1.1", TaskStatus::Assigned, TransitionTrigger::Dependency, Some("a1")).await.expect("pending -> assigned");
    persistence.update_agent_task("a1", Some("1.1")).await.expect("assign task to agent");
    persistence.update_task_state("1.1", TaskStatus::InProgress, TransitionTrigger::Automatic, Some("a1")).await.expect("assigned -> in_progress");
    persistence.update_task_state("1.1", TaskStatus::Completed, TransitionTrigger::Automatic, Some("a1")).await.expect("in_progress -> completed");
    persistence.update_agent_task("a1", None).await.expect("clear agent task");
    persistence.update_agent_state("a1", AgentStatus::Idle, TransitionTrigger::Automatic, None).await.expect("active -> idle");

    let agent = persistence.get_agent("a1").await.unwrap().unwrap();
    assert_eq!(agent.status, AgentStatus::Idle);
    assert!(agent.current_task_id.is_none());

    let task = persistence.get_task("1.1").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    let history = persistence.get_agent_history("a1", None).await.unwrap();
    let states: Vec<_> = history.iter().map(|t| t.to_state.clone()).collect();
    assert_eq!(states, vec!["spawning", "active", "idle"]);
    assert!(history[0].is_creation());
}

#[tokio::test]
async fn agent_cannot_go_idle_while_holding_a_task() {
    let persistence = manager().await;
    persistence.create_agent("a1", AgentType::Implementation, None, serde_json::json!({})).await.unwrap();
    persistence.update_agent_state("a1", AgentStatus::Active, TransitionTrigger::Automatic, None).await.unwrap();
    persistence.update_agent_task("a1", Some("1.1")).await.unwrap();

    let result = persistence.update_agent_state("a1", AgentStatus::Idle, TransitionTrigger::Automatic, None).await;
    assert!(result.is_err(), "idle transition must be rejected while current_task_id is set");
}
