//! Context-window handover detection: watches a progress file's size and
//! content for signs an agent is running out of context, estimates the
//! fraction of its context window consumed, and tracks in-progress
//! handovers as a recordable history.
//!
//! No direct teacher analogue exists (the teacher's substrates don't expose
//! a context-window budget); built in the manner of `progress::header` and
//! `progress::patterns` — typed state enum, `OnceLock`-cached regexes, one
//! small detector struct owning its own watch list.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::domain::models::{EntityType, TransitionTrigger};
use crate::events::bus::{EventBus, LifecycleEvent};

fn explicit_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\[APM_HANDOVER_NEEDED\]|\[APM_HANDOVER\]|context window.*approaching|handover.*needed|requesting.*handover")
            .expect("static pattern is valid")
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandoverConfig {
    pub warning_threshold_pct: f64,
    pub handover_threshold_pct: f64,
    pub max_log_bytes: u64,
    pub chars_per_token: u64,
    pub context_window_tokens: u64,
}

impl Default for HandoverConfig {
    fn default() -> Self {
        Self {
            warning_threshold_pct: 80.0,
            handover_threshold_pct: 90.0,
            max_log_bytes: 50 * 1024,
            chars_per_token: 4,
            context_window_tokens: 200_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum HandoverState {
    None,
    Warning,
    Needed,
}

impl HandoverState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Warning => "warning",
            Self::Needed => "needed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandoverHistoryEntry {
    pub from_agent_id: String,
    pub to_agent_id: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub triggers: Vec<String>,
    pub state: HandoverState,
}

/// Estimated percentage of the context window consumed by a file of
/// `size_bytes`, capped at 100.
pub fn estimate_usage_percentage(size_bytes: u64, config: &HandoverConfig) -> f64 {
    let estimated_tokens = size_bytes.div_ceil(config.chars_per_token);
    let pct = (estimated_tokens as f64 / config.context_window_tokens as f64) * 100.0;
    pct.min(100.0)
}

fn recommendation(state: HandoverState) -> Option<String> {
    match state {
        HandoverState::None => None,
        HandoverState::Warning => {
            Some("context usage is approaching the handover threshold; prepare a handover summary".to_string())
        }
        HandoverState::Needed => Some("context budget exhausted; hand the task off to a fresh agent now".to_string()),
    }
}

struct Watched {
    path: PathBuf,
    agent_id: String,
}

pub struct HandoverDetector {
    config: HandoverConfig,
    bus: Arc<EventBus>,
    watched: Mutex<HashMap<String, Watched>>,
    history: Mutex<HashMap<String, HandoverHistoryEntry>>,
}

impl HandoverDetector {
    pub fn new(bus: Arc<EventBus>, config: HandoverConfig) -> Self {
        Self { config, bus, watched: Mutex::new(HashMap::new()), history: Mutex::new(HashMap::new()) }
    }

    pub fn watch(&self, task_id: impl Into<String>, agent_id: impl Into<String>, path: impl AsRef<Path>) {
        self.watched
            .lock()
            .unwrap()
            .insert(task_id.into(), Watched { path: path.as_ref().to_path_buf(), agent_id: agent_id.into() });
    }

    pub fn unwatch(&self, task_id: &str) {
        self.watched.lock().unwrap().remove(task_id);
    }

    /// Marks a task's handover complete: records `to_agent_id` and
    /// `completed_at` on its history entry, if one exists.
    pub fn complete_handover(&self, task_id: &str, to_agent_id: impl Into<String>) {
        if let Some(entry) = self.history.lock().unwrap().get_mut(task_id) {
            entry.to_agent_id = Some(to_agent_id.into());
            entry.completed_at = Some(Utc::now());
        }
    }

    pub fn history(&self, task_id: &str) -> Option<HandoverHistoryEntry> {
        self.history.lock().unwrap().get(task_id).cloned()
    }

    pub async fn poll_once(&self) {
        let targets: Vec<(String, String, PathBuf)> = self
            .watched
            .lock()
            .unwrap()
            .iter()
            .map(|(task_id, w)| (task_id.clone(), w.agent_id.clone(), w.path.clone()))
            .collect();

        for (task_id, agent_id, path) in targets {
            let Ok(metadata) = tokio::fs::metadata(&path).await else { continue };
            let Ok(content) = tokio::fs::read_to_string(&path).await else { continue };

            let mut triggers = Vec::new();
            let usage_pct = estimate_usage_percentage(metadata.len(), &self.config);
            let explicit = explicit_marker().is_match(&content);
            if explicit {
                triggers.push("explicit_marker".to_string());
            }
            if metadata.len() >= self.config.max_log_bytes {
                triggers.push("max_log_bytes_exceeded".to_string());
            }
            if usage_pct >= self.config.warning_threshold_pct {
                triggers.push(format!("context_usage_{usage_pct:.0}pct"));
            }

            let state = if explicit || metadata.len() >= self.config.max_log_bytes || usage_pct >= self.config.handover_threshold_pct {
                HandoverState::Needed
            } else if usage_pct >= self.config.warning_threshold_pct {
                HandoverState::Warning
            } else {
                HandoverState::None
            };

            if state == HandoverState::None {
                continue;
            }

            {
                let mut history = self.history.lock().unwrap();
                history
                    .entry(task_id.clone())
                    .and_modify(|entry| {
                        entry.state = state;
                        entry.triggers = triggers.clone();
                    })
                    .or_insert_with(|| HandoverHistoryEntry {
                        from_agent_id: agent_id.clone(),
                        to_agent_id: None,
                        detected_at: Utc::now(),
                        completed_at: None,
                        triggers: triggers.clone(),
                        state,
                    });
            }

            self.bus
                .publish(LifecycleEvent {
                    sequence: 0,
                    entity_type: EntityType::Agent,
                    entity_id: agent_id,
                    from_state: String::new(),
                    to_state: format!("handover_{}", state.as_str()),
                    timestamp: Utc::now(),
                    trigger: TransitionTrigger::Automatic,
                    metadata: Some(serde_json::json!({
                        "taskId": task_id,
                        "triggers": triggers,
                        "recommendation": recommendation(state),
                    })),
                })
                .await;
        }
    }
}

#[async_trait::async_trait]
impl crate::progress::poller::PollTask for HandoverDetector {
    async fn poll_once(&self) {
        HandoverDetector::poll_once(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[tokio::test]
    async fn explicit_marker_forces_needed_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.1.md");
        std::fs::File::create(&path).unwrap().write_all(b"work in progress\n[APM_HANDOVER_NEEDED]\n").unwrap();

        let bus = Arc::new(EventBus::new(16));
        let (_id, mut receiver) = bus.subscribe(None).await;
        let detector = HandoverDetector::new(bus, HandoverConfig::default());
        detector.watch("1.1", "a1", &path);
        detector.poll_once().await;

        let event = tokio::time::timeout(Duration::from_millis(50), receiver.recv()).await.unwrap().unwrap();
        assert_eq!(event.to_state, "handover_needed");

        let entry = detector.history("1.1").unwrap();
        assert_eq!(entry.state, HandoverState::Needed);
        assert!(entry.triggers.contains(&"explicit_marker".to_string()));
    }

    #[tokio::test]
    async fn large_file_exceeds_max_log_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.1.md");
        let content = "x".repeat(60 * 1024);
        std::fs::write(&path, content).unwrap();

        let bus = Arc::new(EventBus::new(16));
        let detector = HandoverDetector::new(bus, HandoverConfig::default());
        detector.watch("1.1", "a1", &path);
        detector.poll_once().await;

        assert_eq!(detector.history("1.1").unwrap().state, HandoverState::Needed);
    }

    #[tokio::test]
    async fn small_quiet_file_is_none_and_untracked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.1.md");
        std::fs::write(&path, "still working, no issues").unwrap();

        let bus = Arc::new(EventBus::new(16));
        let detector = HandoverDetector::new(bus, HandoverConfig::default());
        detector.watch("1.1", "a1", &path);
        detector.poll_once().await;

        assert!(detector.history("1.1").is_none());
    }

    #[test]
    fn usage_percentage_is_capped_at_100() {
        let config = HandoverConfig { chars_per_token: 1, context_window_tokens: 10, ..Default::default() };
        assert_eq!(estimate_usage_percentage(1_000, &config), 100.0);
    }

    #[test]
    fn complete_handover_records_destination_agent() {
        let bus = Arc::new(EventBus::new(16));
        let detector = HandoverDetector::new(bus, HandoverConfig::default());
        detector.history.lock().unwrap().insert(
            "1.1".to_string(),
            HandoverHistoryEntry {
                from_agent_id: "a1".to_string(),
                to_agent_id: None,
                detected_at: Utc::now(),
                completed_at: None,
                triggers: vec!["explicit_marker".to_string()],
                state: HandoverState::Needed,
            },
        );

        detector.complete_handover("1.1", "a2");
        let entry = detector.history("1.1").unwrap();
        assert_eq!(entry.to_agent_id.as_deref(), Some("a2"));
        assert!(entry.completed_at.is_some());
    }
}
