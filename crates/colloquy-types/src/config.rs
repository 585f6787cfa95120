//! Engine configuration types for Colloquy.
//!
//! `EngineConfig` represents the `config.toml` in the data directory. Every
//! field has a default so an empty or missing file is valid.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the dialog engine and its binaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Chain timeout used when a definition does not declare one.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: i64,

    /// Validation failures tolerated per step when a definition does not declare it.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// How long completed/cancelled sessions stay in the store before eviction.
    #[serde(default = "default_eviction_grace_secs")]
    pub eviction_grace_secs: u64,

    /// Period of the background timeout sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Bound on a single Action step's external call.
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,

    /// SQLite URL for the session store. Defaults to `{data_dir}/colloquy.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Directory scanned for chain YAML files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains_dir: Option<String>,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}

fn default_timeout_secs() -> i64 {
    3600
}

fn default_max_retries() -> u32 {
    3
}

fn default_eviction_grace_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_action_timeout_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            default_max_retries: default_max_retries(),
            eviction_grace_secs: default_eviction_grace_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            action_timeout_secs: default_action_timeout_secs(),
            database_url: None,
            chains_dir: None,
            log_format: LogFormat::default(),
            otel: false,
        }
    }
}

/// Output format of the tracing fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
