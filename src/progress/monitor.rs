//! Progress monitoring: derives a per-task snapshot from the progress file
//! on disk, and flags agents that have stopped updating it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use crate::domain::models::AgentStatus;
use crate::progress::header::ProgressDocument;
use crate::progress::patterns::DetectedPatterns;
use crate::progress::validator;

/// Status of a task as derived from its progress file and owning agent
/// distinct from the raw `## status` header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedStatus {
    Completed,
    Failed,
    InProgress,
    NotStarted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskProgress {
    pub task_id: String,
    pub agent: String,
    pub status: DerivedStatus,
    pub completion_percentage: u8,
    pub patterns: DetectedPatterns,
    pub last_modified: SystemTime,
}

/// Looks up an agent's current lifecycle status and last activity time, so
/// `ProgressMonitor` can derive `Terminated`-aware task status and
/// heartbeat-based staleness without depending on persistence directly.
#[async_trait::async_trait]
pub trait AgentLookup: Send + Sync {
    async fn agent_state(&self, agent_id: &str) -> Option<(AgentStatus, DateTime<Utc>)>;
}

#[async_trait::async_trait]
impl AgentLookup for crate::persistence::PersistenceManager {
    async fn agent_state(&self, agent_id: &str) -> Option<(AgentStatus, DateTime<Utc>)> {
        self.get_agent(agent_id).await.ok().flatten().map(|a| (a.status, a.last_activity_at))
    }
}

/// `Terminated` agent: `Completed` if a completion marker is present, else
/// `Failed`. Otherwise: `Failed` on any error/blocker indicator; else
/// `Completed` on a completion marker; else `InProgress` if the file has any
/// body content; else `NotStarted`.
fn derive_status(body_has_content: bool, patterns: &DetectedPatterns, agent_terminated: bool) -> DerivedStatus {
    let completed = patterns.completion_markers > 0;
    if agent_terminated {
        return if completed { DerivedStatus::Completed } else { DerivedStatus::Failed };
    }
    if patterns.error_indicators > 0 || patterns.blocker_indicators > 0 {
        DerivedStatus::Failed
    } else if completed {
        DerivedStatus::Completed
    } else if body_has_content {
        DerivedStatus::InProgress
    } else {
        DerivedStatus::NotStarted
    }
}

/// Bounded heuristic: +30 if the file has content, +20 if
/// it's over 50 lines, +25 if free of error/blocker indicators, +25 on a
/// completion marker, capped at 100.
fn derive_completion_percentage(body: &str, patterns: &DetectedPatterns) -> u8 {
    let mut score: u16 = 0;
    if !body.trim().is_empty() {
        score += 30;
    }
    if body.lines().count() > 50 {
        score += 20;
    }
    if patterns.error_indicators == 0 && patterns.blocker_indicators == 0 {
        score += 25;
    }
    if patterns.completion_markers > 0 {
        score += 25;
    }
    score.min(100) as u8
}

fn derive_task_progress(
    task_id: &str,
    document: &ProgressDocument,
    last_modified: SystemTime,
    agent_terminated: bool,
) -> TaskProgress {
    let patterns = validator::scan(document);
    let body = document.body_text();
    let has_content = !body.trim().is_empty();
    TaskProgress {
        task_id: task_id.to_string(),
        agent: document.header.agent.clone(),
        status: derive_status(has_content, &patterns, agent_terminated),
        completion_percentage: derive_completion_percentage(&body, &patterns),
        patterns,
        last_modified,
    }
}

#[derive(Debug)]
struct WatchedFile {
    path: PathBuf,
    agent_id: String,
    last_seen_modified: Option<SystemTime>,
    last_progress_change: SystemTime,
}

/// Watches a set of progress files, recomputing `TaskProgress` on each poll
/// and flagging stalled agents. When no `AgentLookup` is configured,
/// staleness falls back to file-mtime-based detection rather than the agent
/// heartbeat, since there is then no `last_activity_at` to consult.
pub struct ProgressMonitor {
    stall_threshold: Duration,
    agent_lookup: Option<Arc<dyn AgentLookup>>,
    files: Mutex<HashMap<String, WatchedFile>>,
    snapshots: Mutex<HashMap<String, TaskProgress>>,
}

impl ProgressMonitor {
    pub fn new(stall_threshold: Duration) -> Self {
        Self { stall_threshold, agent_lookup: None, files: Mutex::new(HashMap::new()), snapshots: Mutex::new(HashMap::new()) }
    }

    pub fn with_agent_lookup(stall_threshold: Duration, agent_lookup: Arc<dyn AgentLookup>) -> Self {
        Self {
            stall_threshold,
            agent_lookup: Some(agent_lookup),
            files: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    pub fn watch(&self, task_id: impl Into<String>, agent_id: impl Into<String>, path: impl AsRef<Path>) {
        let task_id = task_id.into();
        let now = SystemTime::now();
        self.files.lock().unwrap().insert(
            task_id,
            WatchedFile {
                path: path.as_ref().to_path_buf(),
                agent_id: agent_id.into(),
                last_seen_modified: None,
                last_progress_change: now,
            },
        );
    }

    pub fn unwatch(&self, task_id: &str) {
        self.files.lock().unwrap().remove(task_id);
        self.snapshots.lock().unwrap().remove(task_id);
    }

    /// Re-reads every watched progress file, updating its snapshot. Files
    /// that fail to read or parse are skipped rather than aborting the
    /// whole poll, since a worker mid-write can leave a transient partial
    /// file.
    pub async fn poll_once(&self) {
        let targets: Vec<(String, String, PathBuf)> =
            self.files.lock().unwrap().iter().map(|(id, f)| (id.clone(), f.agent_id.clone(), f.path.clone())).collect();

        for (task_id, agent_id, path) in targets {
            let Ok(metadata) = tokio::fs::metadata(&path).await else { continue };
            let Ok(modified) = metadata.modified() else { continue };

            let changed = {
                let files = self.files.lock().unwrap();
                files.get(&task_id).map(|f| f.last_seen_modified != Some(modified)).unwrap_or(false)
            };
            if !changed {
                continue;
            }

            let Ok(content) = tokio::fs::read_to_string(&path).await else { continue };
            let Ok(document) = ProgressDocument::parse(&content) else { continue };

            let agent_terminated = match &self.agent_lookup {
                Some(lookup) => lookup.agent_state(&agent_id).await.is_some_and(|(s, _)| s == AgentStatus::Terminated),
                None => false,
            };

            let snapshot = derive_task_progress(&task_id, &document, modified, agent_terminated);
            self.snapshots.lock().unwrap().insert(task_id.clone(), snapshot);

            let mut files = self.files.lock().unwrap();
            if let Some(entry) = files.get_mut(&task_id) {
                entry.last_seen_modified = Some(modified);
                entry.last_progress_change = SystemTime::now();
            }
        }
    }

    pub fn snapshot(&self, task_id: &str) -> Option<TaskProgress> {
        self.snapshots.lock().unwrap().get(task_id).cloned()
    }

    /// Task ids whose owning agent is stalled: `status=Active` and
    /// `now - last_activity_at > stall_threshold`. Falls back to file-mtime
    /// staleness for tasks with no agent lookup configured.
    pub async fn stalled_tasks(&self) -> Vec<String> {
        let targets: Vec<(String, String, SystemTime)> = self
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(id, f)| (id.clone(), f.agent_id.clone(), f.last_progress_change))
            .collect();

        let mut stalled = Vec::new();
        for (task_id, agent_id, last_progress_change) in targets {
            let is_stalled = match &self.agent_lookup {
                Some(lookup) => match lookup.agent_state(&agent_id).await {
                    Some((AgentStatus::Active, last_activity_at)) => {
                        Utc::now().signed_duration_since(last_activity_at).to_std().unwrap_or_default() > self.stall_threshold
                    }
                    _ => false,
                },
                None => SystemTime::now().duration_since(last_progress_change).unwrap_or_default() > self.stall_threshold,
            };
            if is_stalled {
                stalled.push(task_id);
            }
        }
        stalled
    }
}

#[async_trait::async_trait]
impl crate::progress::poller::PollTask for ProgressMonitor {
    async fn poll_once(&self) {
        ProgressMonitor::poll_once(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::header::{ProgressHeader, ProgressStatus};
    use std::io::Write;

    fn write_sample(path: &Path, status: ProgressStatus, output: &str) {
        let mut header = ProgressHeader::new("Agent_QA", "1.1");
        header.status = status;
        let mut document = ProgressDocument::new(header);
        document.set_section("Summary", "working");
        document.set_section("Output", output);
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(document.render().as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn poll_produces_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.1.md");
        write_sample(&path, ProgressStatus::InProgress, "wired the pool");

        let monitor = ProgressMonitor::new(Duration::from_secs(3600));
        monitor.watch("1.1", "a1", &path);
        monitor.poll_once().await;

        let snapshot = monitor.snapshot("1.1").unwrap();
        assert_eq!(snapshot.status, DerivedStatus::InProgress);
        assert!(snapshot.completion_percentage > 0);
    }

    #[tokio::test]
    async fn completion_marker_and_long_body_reach_full_percentage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.1.md");
        let mut output = "All tests passing.\n".to_string();
        for i in 0..55 {
            output.push_str(&format!("line {i} of the implementation notes\n"));
        }
        write_sample(&path, ProgressStatus::Completed, &output);

        let monitor = ProgressMonitor::new(Duration::from_secs(3600));
        monitor.watch("1.1", "a1", &path);
        monitor.poll_once().await;

        let snapshot = monitor.snapshot("1.1").unwrap();
        assert_eq!(snapshot.completion_percentage, 100);
        assert_eq!(snapshot.status, DerivedStatus::Completed);
    }

    #[tokio::test]
    async fn error_indicator_marks_task_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.1.md");
        write_sample(&path, ProgressStatus::Error, "hit an Exception while running migrations");

        let monitor = ProgressMonitor::new(Duration::from_secs(3600));
        monitor.watch("1.1", "a1", &path);
        monitor.poll_once().await;

        assert_eq!(monitor.snapshot("1.1").unwrap().status, DerivedStatus::Failed);
    }

    struct FixedLookup(AgentStatus, DateTime<Utc>);

    #[async_trait::async_trait]
    impl AgentLookup for FixedLookup {
        async fn agent_state(&self, _agent_id: &str) -> Option<(AgentStatus, DateTime<Utc>)> {
            Some((self.0, self.1))
        }
    }

    #[tokio::test]
    async fn terminated_agent_without_completion_marker_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.1.md");
        write_sample(&path, ProgressStatus::InProgress, "still wiring things up");

        let lookup = Arc::new(FixedLookup(AgentStatus::Terminated, Utc::now()));
        let monitor = ProgressMonitor::with_agent_lookup(Duration::from_secs(3600), lookup);
        monitor.watch("1.1", "a1", &path);
        monitor.poll_once().await;

        assert_eq!(monitor.snapshot("1.1").unwrap().status, DerivedStatus::Failed);
    }

    #[tokio::test]
    async fn active_agent_past_stall_threshold_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.1.md");
        write_sample(&path, ProgressStatus::InProgress, "still wiring things up");

        let stale_since = Utc::now() - chrono::Duration::seconds(120);
        let lookup = Arc::new(FixedLookup(AgentStatus::Active, stale_since));
        let monitor = ProgressMonitor::with_agent_lookup(Duration::from_secs(60), lookup);
        monitor.watch("1.1", "a1", &path);
        monitor.poll_once().await;

        assert_eq!(monitor.stalled_tasks().await, vec!["1.1".to_string()]);
    }

    #[tokio::test]
    async fn stalled_tasks_falls_back_to_file_mtime_without_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.1.md");
        write_sample(&path, ProgressStatus::InProgress, "still wiring things up");

        let monitor = ProgressMonitor::new(Duration::from_millis(1));
        monitor.watch("1.1", "a1", &path);
        monitor.poll_once().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(monitor.stalled_tasks().await, vec!["1.1".to_string()]);
    }

    #[tokio::test]
    async fn unwatch_removes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.1.md");
        write_sample(&path, ProgressStatus::InProgress, "wired the pool");

        let monitor = ProgressMonitor::new(Duration::from_secs(3600));
        monitor.watch("1.1", "a1", &path);
        monitor.poll_once().await;
        monitor.unwatch("1.1");

        assert!(monitor.snapshot("1.1").is_none());
    }
}
