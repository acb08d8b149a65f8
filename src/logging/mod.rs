//! Structured logging setup (ambient stack — ungoverned by spec.md, which
//! names "the logging sink" only as a thin out-of-scope collaborator, but
//! every production Rust service in the corpus wires `tracing` the same
//! way). Grounded in the teacher's `infrastructure/logging/logger.rs`
//! (`tracing_subscriber::registry` + layered `fmt` layers, JSON to a
//! rolling file, optional pretty stdout), narrowed to the two knobs
//! spec.md's config surface actually exposes: `log_level` and `log_file`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogLevel, Settings};

/// Holds the non-blocking file appender's guard; dropping it flushes
/// pending log lines, so callers must keep it alive for the process
/// lifetime (teacher's `LoggerImpl` does the same with `_guard`).
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the global `tracing` subscriber from `settings`. Idempotent
/// per process (subsequent calls are a no-op if a subscriber is already
/// set, matching `tracing`'s own single-init contract).
pub fn init(settings: &Settings) -> LoggingGuard {
    let level_filter = EnvFilter::builder()
        .with_default_directive(level_to_tracing(settings.log_level).into())
        .from_env_lossy();

    let console_layer = settings.console_output.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_filter(EnvFilter::builder().with_default_directive(level_to_tracing(settings.log_level).into()).from_env_lossy())
    });

    let (file_layer, file_guard) = match &settings.log_file {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "apm-auto.log".to_string());
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(level_filter);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry().with(console_layer).with(file_layer).try_init();

    LoggingGuard { _file_guard: file_guard }
}

fn level_to_tracing(level: LogLevel) -> tracing::Level {
    match level {
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Error => tracing::Level::ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_mapping_is_total() {
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error] {
            let _ = level_to_tracing(level);
        }
    }
}
