//! Cooperative polling scaffold shared by the progress pipeline's three
//! watcher consumers (spec.md §4.I.4: `ProgressMonitor`, `CompletionReporter`,
//! `ErrorEscalator`).
//!
//! Grounded in the teacher's `services/event_scheduler.rs` ticker idiom: an
//! `Arc<AtomicBool>` running flag checked by a `tokio::time::interval` loop,
//! generalized here to also select against a `Notify` so `stop()` can
//! interrupt an in-flight sleep rather than waiting out the tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// One unit of poll work. Implementors inspect whatever state they watch
/// (a set of progress files, a set of agents) and report back.
#[async_trait]
pub trait PollTask: Send + Sync + 'static {
    async fn poll_once(&self);
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(5) }
    }
}

/// Runs a `PollTask` on a fixed interval until `stop()` is called. Multiple
/// `stop()`/`start()` cycles are safe; each `start()` spawns a fresh task.
pub struct Poller {
    config: PollerConfig,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    pub fn new(config: PollerConfig) -> Self {
        Self { config, running: Arc::new(AtomicBool::new(false)), shutdown: Arc::new(Notify::new()), handle: None }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts ticking `task` on the configured interval. A no-op if the
    /// poller is already running.
    pub fn start<T: PollTask>(&mut self, task: Arc<T>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let running = self.running.clone();
        let shutdown = self.shutdown.clone();
        let interval_duration = self.config.interval;

        self.handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        task.poll_once().await;
                    }
                    _ = shutdown.notified() => break,
                }
            }
        }));
    }

    /// Signals the running task to stop and waits for it to finish its
    /// current tick, if any. Safe to call when not running.
    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
