//! Typed settings struct for spec.md §6's `APM_AUTO_*` environment
//! variables and the equivalent YAML config file keys.

use serde::{Deserialize, Deserializer, Serialize};

/// Log level accepted by `APM_AUTO_LOG_LEVEL` (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Autonomy level read from `APM_AUTO_AUTONOMY_LEVEL`; opaque beyond
/// display and threaded into the prompt-context collaborator (spec.md §1
/// names prompt content itself as out of scope).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutonomyLevel(pub String);

impl Default for AutonomyLevel {
    fn default() -> Self {
        Self("supervised".to_string())
    }
}

/// Accepts `true|1|yes` / `false|0|no`, case-insensitive (spec.md §6).
fn deserialize_flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        String(String),
    }

    match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(b) => Ok(b),
        BoolOrString::String(s) => match s.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected true|1|yes or false|0|no, got {other:?}"
            ))),
        },
    }
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_max_agents() -> u32 {
    10
}

fn default_max_worktrees() -> u32 {
    10
}

fn default_token_budget() -> u64 {
    100_000
}

fn default_database_path() -> String {
    "./.apm-auto/state.db".to_string()
}

/// Settings assembled from defaults, config files, and `APM_AUTO_*`
/// environment variables (spec.md §6). Field names map 1:1 to the
/// `APM_AUTO_<FIELD_NAME>` env var in upper snake case, per figment's
/// `Env::prefixed` convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Settings {
    #[serde(default)]
    pub config_path: Option<String>,

    #[serde(default = "default_false", deserialize_with = "deserialize_flexible_bool")]
    pub verbose: bool,

    #[serde(default)]
    pub autonomy_level: AutonomyLevel,

    #[serde(default = "default_max_agents")]
    pub max_agents: u32,

    #[serde(default = "default_max_worktrees")]
    pub max_worktrees: u32,

    #[serde(default = "default_token_budget")]
    pub token_budget: u64,

    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub log_file: Option<String>,

    #[serde(default = "default_true", deserialize_with = "deserialize_flexible_bool")]
    pub console_output: bool,

    #[serde(default = "default_true", deserialize_with = "deserialize_flexible_bool")]
    pub notifications_enabled: bool,

    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default = "default_false", deserialize_with = "deserialize_flexible_bool")]
    pub backup_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: None,
            verbose: default_false(),
            autonomy_level: AutonomyLevel::default(),
            max_agents: default_max_agents(),
            max_worktrees: default_max_worktrees(),
            token_budget: default_token_budget(),
            log_level: LogLevel::default(),
            log_file: None,
            console_output: default_true(),
            notifications_enabled: default_true(),
            database_path: default_database_path(),
            backup_enabled: default_false(),
        }
    }
}
