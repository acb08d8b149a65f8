//! Worker spawn wrapper (spec.md §4.K).
//!
//! Thin wrapper around the OS process launcher, grounded in the teacher's
//! `adapters/substrates/claude_code.rs` (`ClaudeCodeConfig`,
//! `tokio::process::Command` launch, streamed-output parsing) but narrowed
//! to spec.md's three operations: availability check, single spawn, and
//! spawn-with-retry gated on OS error classification.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::timeout;

/// Classification of a failed spawn attempt (spec.md §4.K). Only the
/// transient kinds are eligible for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnErrorKind {
    CliNotFound,
    PermissionDenied,
    ResourceUnavailable,
    TooManyFiles,
    SpawnTimeout,
    Unknown,
}

impl SpawnErrorKind {
    /// `spawnWithRetry` retries only these kinds (spec.md §4.K).
    pub fn is_transient(self) -> bool {
        matches!(self, Self::ResourceUnavailable | Self::TooManyFiles | Self::SpawnTimeout)
    }

    /// Classify a raw `std::io::Error` from `Command::spawn` by its
    /// `ErrorKind` and `raw_os_error` (POSIX `EAGAIN`/`ENOMEM`=11/12 for
    /// resource exhaustion, `EMFILE`/`ENFILE`=24/23 for fd limits).
    fn from_io_error(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::CliNotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => match err.raw_os_error() {
                Some(11) | Some(12) => Self::ResourceUnavailable, // EAGAIN, ENOMEM
                Some(23) | Some(24) => Self::TooManyFiles,        // ENFILE, EMFILE
                _ => Self::Unknown,
            },
        }
    }
}

#[derive(Debug, Error)]
#[error("spawn failed ({kind:?}): {message}")]
pub struct SpawnError {
    pub kind: SpawnErrorKind,
    pub message: String,
}

impl SpawnError {
    fn new(kind: SpawnErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// Result of `checkAvailability()`.
#[derive(Debug, Clone)]
pub struct Availability {
    pub available: bool,
    pub path: Option<PathBuf>,
    pub error: Option<String>,
}

/// Options accepted by `spawn()`.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
    pub inherit_stdio: bool,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            env: HashMap::new(),
            working_dir: None,
            timeout: Duration::from_secs(5 * 60),
            inherit_stdio: false,
        }
    }
}

/// A spawned worker process handle.
pub struct SpawnHandle {
    pub pid: u32,
    pub child: Child,
}

/// Retry policy for `spawnWithRetry` (spec.md §4.K: exponential backoff,
/// permanent kinds fail fast).
#[derive(Debug, Clone, Copy)]
pub struct SpawnRetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for SpawnRetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_secs(1) }
    }
}

pub struct WorkerSpawner {
    binary_path: String,
}

impl WorkerSpawner {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self { binary_path: binary_path.into() }
    }

    /// Resolve the worker binary via a platform-appropriate `PATH` lookup
    /// (or, if `binary_path` is already a path, verify it directly).
    pub fn check_availability(&self) -> Availability {
        let candidate = PathBuf::from(&self.binary_path);
        if candidate.is_absolute() || self.binary_path.contains(std::path::MAIN_SEPARATOR) {
            return if candidate.exists() {
                Availability { available: true, path: Some(candidate), error: None }
            } else {
                Availability { available: false, path: None, error: Some(format!("{} does not exist", candidate.display())) }
            };
        }

        match which(&self.binary_path) {
            Some(path) => Availability { available: true, path: Some(path), error: None },
            None => Availability {
                available: false,
                path: None,
                error: Some(format!("{} not found on PATH", self.binary_path)),
            },
        }
    }

    /// Launch the worker with `prompt` as its final positional argument,
    /// merging `opts.env` over the inherited environment.
    pub async fn spawn(&self, prompt: &str, opts: &SpawnOptions) -> Result<SpawnHandle, SpawnError> {
        let mut command = Command::new(&self.binary_path);
        command.arg("-p").arg(prompt);
        command.envs(&opts.env);
        if let Some(dir) = &opts.working_dir {
            command.current_dir(dir);
        }
        if opts.inherit_stdio {
            command.stdin(Stdio::inherit()).stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let spawn_result = timeout(opts.timeout, async { command.spawn() }).await;

        let child = match spawn_result {
            Err(_) => return Err(SpawnError::new(SpawnErrorKind::SpawnTimeout, "spawn timed out")),
            Ok(Err(io_err)) => {
                let kind = SpawnErrorKind::from_io_error(&io_err);
                return Err(SpawnError::new(kind, io_err.to_string()));
            }
            Ok(Ok(child)) => child,
        };

        let pid = child.id().ok_or_else(|| SpawnError::new(SpawnErrorKind::Unknown, "process exited before pid was observed"))?;
        Ok(SpawnHandle { pid, child })
    }

    /// Retry `spawn` with exponential backoff, but only for transient
    /// error kinds; permanent kinds (`CliNotFound`, `PermissionDenied`)
    /// fail fast without consuming a retry.
    pub async fn spawn_with_retry(
        &self,
        prompt: &str,
        opts: &SpawnOptions,
        policy: SpawnRetryPolicy,
    ) -> Result<SpawnHandle, SpawnError> {
        let mut attempt = 0;
        loop {
            match self.spawn(prompt, opts).await {
                Ok(handle) => return Ok(handle),
                Err(err) if err.kind.is_transient() && attempt < policy.max_retries => {
                    tokio::time::sleep(policy.base_delay * 2u32.pow(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Minimal `PATH`-based binary lookup (spec.md §4.K "platform-appropriate
/// lookup"); avoids pulling in a dedicated `which` crate for one call site.
fn which(binary: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(binary);
        candidate.is_file().then_some(candidate)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_binary_reports_not_found() {
        let spawner = WorkerSpawner::new("definitely-not-a-real-binary-xyz");
        let availability = spawner.check_availability();
        assert!(!availability.available);
        assert!(availability.error.is_some());
    }

    #[test]
    fn transient_kinds_are_retry_eligible() {
        assert!(SpawnErrorKind::ResourceUnavailable.is_transient());
        assert!(SpawnErrorKind::TooManyFiles.is_transient());
        assert!(SpawnErrorKind::SpawnTimeout.is_transient());
        assert!(!SpawnErrorKind::CliNotFound.is_transient());
        assert!(!SpawnErrorKind::PermissionDenied.is_transient());
    }

    #[tokio::test]
    async fn spawn_nonexistent_binary_is_cli_not_found() {
        let spawner = WorkerSpawner::new("definitely-not-a-real-binary-xyz");
        let result = spawner.spawn("hello", &SpawnOptions::default()).await;
        assert_eq!(result.unwrap_err().kind, SpawnErrorKind::CliNotFound);
    }

    #[tokio::test]
    async fn spawn_with_retry_fails_fast_on_permanent_error() {
        let spawner = WorkerSpawner::new("definitely-not-a-real-binary-xyz");
        let policy = SpawnRetryPolicy { max_retries: 3, base_delay: Duration::from_millis(1) };
        let result = spawner.spawn_with_retry("hello", &SpawnOptions::default(), policy).await;
        assert_eq!(result.unwrap_err().kind, SpawnErrorKind::CliNotFound);
    }

    #[tokio::test]
    async fn spawn_echo_succeeds() {
        let spawner = WorkerSpawner::new("echo");
        let mut handle = spawner.spawn("hello", &SpawnOptions::default()).await.expect("spawn echo");
        let status = handle.child.wait().await.expect("wait");
        assert!(status.success());
    }
}
