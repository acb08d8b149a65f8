//! Completion detection and reporting: watches the same progress files as
//! `ProgressMonitor` and emits a `task_completed`/`task_partial` event
//! through the event bus exactly once per task.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::domain::models::{EntityType, TransitionTrigger};
use crate::events::bus::{EventBus, LifecycleEvent};
use crate::progress::header::{ProgressDocument, ProgressStatus};

/// Tracks which tasks have already had a completion event emitted, so a
/// task lingering in `Completed` status across several polls only fires
/// once ("auto-detection stops after first detection per task").
pub struct CompletionReporter {
    bus: Arc<EventBus>,
    watched: Mutex<Vec<(String, PathBuf)>>,
    reported: Mutex<HashSet<String>>,
}

impl CompletionReporter {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus, watched: Mutex::new(Vec::new()), reported: Mutex::new(HashSet::new()) }
    }

    pub fn watch(&self, task_id: impl Into<String>, path: impl AsRef<Path>) {
        self.watched.lock().unwrap().push((task_id.into(), path.as_ref().to_path_buf()));
    }

    pub fn unwatch(&self, task_id: &str) {
        self.watched.lock().unwrap().retain(|(id, _)| id != task_id);
        self.reported.lock().unwrap().remove(task_id);
    }

    pub async fn poll_once(&self) {
        let targets: Vec<(String, PathBuf)> = self.watched.lock().unwrap().clone();
        for (task_id, path) in targets {
            if self.reported.lock().unwrap().contains(&task_id) {
                continue;
            }

            let Ok(content) = tokio::fs::read_to_string(&path).await else { continue };
            let Ok(document) = ProgressDocument::parse(&content) else { continue };

            let label = match document.header.status {
                ProgressStatus::Completed => Some("task_completed"),
                ProgressStatus::Partial => Some("task_partial"),
                _ => None,
            };

            if let Some(label) = label {
                let metadata = serde_json::json!({
                    "summary": document.section("Summary").unwrap_or_default(),
                    "details": document.section("Details").unwrap_or_default(),
                    "output": document.section("Output").unwrap_or_default(),
                    "issues": document.section("Issues").unwrap_or_default(),
                    "nextSteps": document.section("Next Steps").unwrap_or_default(),
                    "adHocDelegation": document.header.ad_hoc_delegation,
                    "compatibilityIssues": document.header.compatibility_issues,
                    "importantFindings": document.header.important_findings,
                });
                self.bus
                    .publish(LifecycleEvent {
                        sequence: 0,
                        entity_type: EntityType::Task,
                        entity_id: task_id.clone(),
                        from_state: document.header.status.as_str().to_string(),
                        to_state: label.to_string(),
                        timestamp: Utc::now(),
                        trigger: TransitionTrigger::Automatic,
                        metadata: Some(metadata),
                    })
                    .await;
                self.reported.lock().unwrap().insert(task_id);
            }
        }
    }

    pub fn has_reported(&self, task_id: &str) -> bool {
        self.reported.lock().unwrap().contains(task_id)
    }
}

#[async_trait::async_trait]
impl crate::progress::poller::PollTask for CompletionReporter {
    async fn poll_once(&self) {
        CompletionReporter::poll_once(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::header::ProgressHeader;
    use std::io::Write;
    use std::time::Duration;

    fn write_sample(path: &std::path::Path, status: ProgressStatus) {
        let mut header = ProgressHeader::new("Agent_QA", "1.1");
        header.status = status;
        let mut document = ProgressDocument::new(header);
        document.set_section("Output", "wired the pool");
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(document.render().as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn completed_task_emits_event_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.1.md");
        write_sample(&path, ProgressStatus::Completed);

        let bus = Arc::new(EventBus::new(16));
        let (_id, mut receiver) = bus.subscribe(None).await;

        let reporter = CompletionReporter::new(bus);
        reporter.watch("1.1", &path);
        reporter.poll_once().await;
        reporter.poll_once().await;

        assert!(reporter.has_reported("1.1"));
        let received = tokio::time::timeout(Duration::from_millis(50), receiver.recv()).await;
        let event = received.expect("event should arrive").expect("channel open");
        assert_eq!(event.to_state, "task_completed");
    }

    #[tokio::test]
    async fn in_progress_task_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.1.md");
        write_sample(&path, ProgressStatus::InProgress);

        let bus = Arc::new(EventBus::new(16));
        let reporter = CompletionReporter::new(bus);
        reporter.watch("1.1", &path);
        reporter.poll_once().await;

        assert!(!reporter.has_reported("1.1"));
    }
}
