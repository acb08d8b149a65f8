//! Error escalation: watches progress files that report `Blocked`/`Error`
//! status, classifies each `## Issues` bullet into a blocker category, and
//! emits one `task_blocked` event per bullet.
//!
//! Pattern classification is delegated to `progress::patterns`; this module
//! owns only the per-bullet fan-out, the emitted event shape, and the
//! resolution rewrite (mirrors `recovery::manager`'s event-emission style:
//! ad-hoc `LifecycleEvent`s keyed by a string label rather than an
//! `AgentStatus`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::domain::models::{EntityType, TransitionTrigger};
use crate::events::bus::{EventBus, LifecycleEvent};
use crate::progress::header::{ProgressDocument, ProgressFileError, ProgressStatus};
use crate::progress::patterns::{self, BlockerCategory, BlockerSeverity};

#[derive(Debug, Clone, PartialEq)]
pub struct Blocker {
    pub task_id: String,
    pub bullet: String,
    pub category: BlockerCategory,
    pub severity: BlockerSeverity,
    pub blocking_task_id: Option<String>,
}

/// Splits an `## Issues` body into its bullet lines, tolerating both `-` and
/// `*` markers and ignoring blank lines.
fn issue_bullets(issues: &str) -> Vec<String> {
    issues
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let stripped = trimmed.strip_prefix('-').or_else(|| trimmed.strip_prefix('*'))?;
            let text = stripped.trim();
            if text.is_empty() || text.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(text.to_string())
            }
        })
        .collect()
}

pub struct ErrorEscalator {
    bus: Arc<EventBus>,
    watched: Mutex<Vec<(String, PathBuf)>>,
    /// Bullets already escalated per task, so a reread of an unchanged file
    /// doesn't re-fire the same blocker.
    escalated: Mutex<HashMap<String, Vec<String>>>,
}

impl ErrorEscalator {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus, watched: Mutex::new(Vec::new()), escalated: Mutex::new(HashMap::new()) }
    }

    pub fn watch(&self, task_id: impl Into<String>, path: impl AsRef<Path>) {
        self.watched.lock().unwrap().push((task_id.into(), path.as_ref().to_path_buf()));
    }

    pub fn unwatch(&self, task_id: &str) {
        self.watched.lock().unwrap().retain(|(id, _)| id != task_id);
        self.escalated.lock().unwrap().remove(task_id);
    }

    pub async fn poll_once(&self) {
        let targets: Vec<(String, PathBuf)> = self.watched.lock().unwrap().clone();
        for (task_id, path) in targets {
            let Ok(content) = tokio::fs::read_to_string(&path).await else { continue };
            let Ok(document) = ProgressDocument::parse(&content) else { continue };

            if !matches!(document.header.status, ProgressStatus::Blocked | ProgressStatus::Error) {
                continue;
            }

            let issues = document.section("Issues").unwrap_or_default();
            for bullet in issue_bullets(issues) {
                let already_escalated = {
                    let escalated = self.escalated.lock().unwrap();
                    escalated.get(&task_id).is_some_and(|seen| seen.contains(&bullet))
                };
                if already_escalated {
                    continue;
                }

                let category = patterns::classify_blocker(&bullet);
                let severity = category.default_severity();
                let blocking_task_id =
                    if category == BlockerCategory::ExternalDependency { patterns::blocking_task_id(&bullet) } else { None };

                self.emit(&task_id, &bullet, category, severity, blocking_task_id.as_deref()).await;
                self.escalated.lock().unwrap().entry(task_id.clone()).or_default().push(bullet);
            }
        }
    }

    async fn emit(
        &self,
        task_id: &str,
        bullet: &str,
        category: BlockerCategory,
        severity: BlockerSeverity,
        blocking_task_id: Option<&str>,
    ) {
        self.bus
            .publish(LifecycleEvent {
                sequence: 0,
                entity_type: EntityType::Task,
                entity_id: task_id.to_string(),
                from_state: ProgressStatus::Blocked.as_str().to_string(),
                to_state: "task_blocked".to_string(),
                timestamp: Utc::now(),
                trigger: TransitionTrigger::Error,
                metadata: Some(serde_json::json!({
                    "bullet": bullet,
                    "category": format!("{category:?}"),
                    "severity": format!("{severity:?}"),
                    "blockingTaskId": blocking_task_id,
                })),
            })
            .await;
    }

    /// Rewrites the progress file at `path`: status back to `InProgress` and
    /// `reason` appended to `## Issues` as `Resolved: <reason>`.
    pub async fn resolve_blocker(&self, path: impl AsRef<Path>, reason: &str) -> Result<(), ProgressFileError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|_| ProgressFileError::MissingHeader)?;
        let mut document = ProgressDocument::parse(&content)?;
        document.header.status = ProgressStatus::InProgress;
        document.append_to_section("Issues", &format!("Resolved: {reason}"));
        let _ = tokio::fs::write(path, document.render()).await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl crate::progress::poller::PollTask for ErrorEscalator {
    async fn poll_once(&self) {
        ErrorEscalator::poll_once(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::header::ProgressHeader;
    use std::io::Write;
    use std::time::Duration;

    fn write_blocked(path: &Path, issues: &str) {
        let mut header = ProgressHeader::new("Agent_QA", "2.1");
        header.status = ProgressStatus::Blocked;
        let mut document = ProgressDocument::new(header);
        document.set_section("Issues", issues);
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(document.render().as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn blocked_bullet_emits_task_blocked_with_category() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2.1.md");
        write_blocked(&path, "- blocked by Task 1.1 Output, waiting on upstream vendor API\n");

        let bus = Arc::new(EventBus::new(16));
        let (_id, mut receiver) = bus.subscribe(None).await;
        let escalator = ErrorEscalator::new(bus);
        escalator.watch("2.1", &path);
        escalator.poll_once().await;

        let event = tokio::time::timeout(Duration::from_millis(50), receiver.recv()).await.unwrap().unwrap();
        assert_eq!(event.to_state, "task_blocked");
        assert_eq!(event.metadata.unwrap()["blockingTaskId"], serde_json::json!("1.1"));
    }

    #[tokio::test]
    async fn same_bullet_does_not_re_escalate_on_second_poll() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2.1.md");
        write_blocked(&path, "- flaky tests in the integration suite\n");

        let bus = Arc::new(EventBus::new(16));
        let escalator = ErrorEscalator::new(bus);
        escalator.watch("2.1", &path);
        escalator.poll_once().await;
        escalator.poll_once().await;

        assert_eq!(escalator.escalated.lock().unwrap().get("2.1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolve_blocker_rewrites_status_and_appends_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2.1.md");
        write_blocked(&path, "- ambiguous requirements on the output format\n");

        let bus = Arc::new(EventBus::new(16));
        let escalator = ErrorEscalator::new(bus);
        escalator.resolve_blocker(&path, "clarified with the phase owner").await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let document = ProgressDocument::parse(&content).unwrap();
        assert_eq!(document.header.status, ProgressStatus::InProgress);
        assert!(document.section("Issues").unwrap().contains("Resolved: clarified with the phase owner"));
    }
}
