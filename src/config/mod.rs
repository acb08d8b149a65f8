//! Configuration loading (spec.md §6 "Environment variables").
//!
//! Hierarchical merge via `figment`, grounded in the teacher's
//! `infrastructure/config/loader.rs` (`ConfigLoader::load`,
//! `Figment::merge` chain, `ConfigError` enum). Precedence here follows
//! spec.md exactly: env > project config file > global config file >
//! defaults — the reverse merge order from the teacher's project-then-env
//! chain, since spec.md gives project config a *lower* priority than env
//! (the teacher's `ABATHUR_` prefix is the last merge; ours is too, so the
//! ordering matches, only the prefix and file locations differ).

mod settings;

pub use settings::{AutonomyLevel, LogLevel, Settings};

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

/// Env var prefix spec.md §6 mandates (`APM_AUTO_*`).
pub const ENV_PREFIX: &str = "APM_AUTO_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid max_agents: {0}, must be between 1 and 100")]
    InvalidMaxAgents(u32),
    #[error("invalid max_worktrees: {0}, must be between 1 and 50")]
    InvalidMaxWorktrees(u32),
    #[error("invalid token_budget: {0}, must be at least 1000")]
    InvalidTokenBudget(u64),
    #[error("invalid log_level: {0}")]
    InvalidLogLevel(String),
    #[error("failed to load configuration: {0}")]
    Figment(#[from] figment::Error),
}

/// Default project config path, `./.apm-auto/config.yml` (spec.md §6).
pub fn project_config_path() -> std::path::PathBuf {
    std::path::PathBuf::from("./.apm-auto/config.yml")
}

/// Default global config path, `~/.apm-auto/config.yml` (spec.md §6).
pub fn global_config_path() -> std::path::PathBuf {
    dirs_home().join(".apm-auto/config.yml")
}

fn dirs_home() -> std::path::PathBuf {
    std::env::var_os("HOME").map(std::path::PathBuf::from).unwrap_or_else(|| std::path::PathBuf::from("."))
}

/// Load settings with the precedence spec.md §6 requires: programmatic
/// defaults, then the global config file, then the project config file
/// (deep merge for objects), then environment variables (highest).
pub fn load() -> Result<Settings, ConfigError> {
    load_from(&global_config_path(), &project_config_path())
}

pub fn load_from(global_path: &std::path::Path, project_path: &std::path::Path) -> Result<Settings, ConfigError> {
    let settings: Settings = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Yaml::file(global_path))
        .merge(Yaml::file(project_path))
        .merge(Env::prefixed(ENV_PREFIX))
        .extract()?;

    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.max_agents == 0 || settings.max_agents > 100 {
        return Err(ConfigError::InvalidMaxAgents(settings.max_agents));
    }
    if settings.max_worktrees == 0 || settings.max_worktrees > 50 {
        return Err(ConfigError::InvalidMaxWorktrees(settings.max_worktrees));
    }
    if settings.token_budget < 1000 {
        return Err(ConfigError::InvalidTokenBudget(settings.token_budget));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(validate(&Settings::default()).is_ok());
    }

    #[test]
    fn rejects_max_agents_over_100() {
        let settings = Settings { max_agents: 101, ..Settings::default() };
        assert!(matches!(validate(&settings), Err(ConfigError::InvalidMaxAgents(101))));
    }

    #[test]
    fn rejects_token_budget_under_1000() {
        let settings = Settings { token_budget: 999, ..Settings::default() };
        assert!(matches!(validate(&settings), Err(ConfigError::InvalidTokenBudget(999))));
    }

    #[test]
    fn load_from_missing_files_uses_defaults_and_env() {
        std::env::set_var("APM_AUTO_MAX_AGENTS", "7");
        let settings = load_from(
            std::path::Path::new("/nonexistent/global.yml"),
            std::path::Path::new("/nonexistent/project.yml"),
        )
        .unwrap();
        assert_eq!(settings.max_agents, 7);
        std::env::remove_var("APM_AUTO_MAX_AGENTS");
    }
}
