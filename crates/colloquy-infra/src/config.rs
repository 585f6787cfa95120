//! Engine configuration loader for Colloquy.
//!
//! Reads `config.toml` from the data directory (`~/.colloquy/` by default)
//! into [`EngineConfig`]. Falls back to defaults when the file is missing
//! or malformed.

use std::path::{Path, PathBuf};

use colloquy_types::config::EngineConfig;

const DATA_DIR_ENV: &str = "COLLOQUY_DATA_DIR";

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparseable file: logs a warning and returns the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// Resolve the data directory.
///
/// Priority:
/// 1. `COLLOQUY_DATA_DIR` environment variable
/// 2. `~/.colloquy`
/// 3. `./.colloquy`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".colloquy");
    }
    PathBuf::from(".colloquy")
}

/// SQLite URL for the session store: the configured one, or
/// `{data_dir}/colloquy.db`.
pub fn database_url(config: &EngineConfig, data_dir: &Path) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(|| format!("sqlite://{}?mode=rwc", data_dir.join("colloquy.db").display()))
}

/// Directory scanned for chain definitions: the configured one, or
/// `{data_dir}/chains`.
pub fn chains_dir(config: &EngineConfig, data_dir: &Path) -> PathBuf {
    config
        .chains_dir
        .as_ref()
        .map_or_else(|| data_dir.join("chains"), PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_types::config::LogFormat;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
default_timeout_secs = 120
default_max_retries = 5
log_format = "json"
otel = true
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.default_timeout_secs, 120);
        assert_eq!(config.default_max_retries, 5);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.otel);
        assert_eq!(config.eviction_grace_secs, 300);
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn database_url_prefers_configured_value() {
        let dir = Path::new("/var/lib/colloquy");
        let mut config = EngineConfig::default();
        assert_eq!(
            database_url(&config, dir),
            "sqlite:///var/lib/colloquy/colloquy.db?mode=rwc"
        );
        config.database_url = Some("sqlite:///tmp/x.db".into());
        assert_eq!(database_url(&config, dir), "sqlite:///tmp/x.db");
    }

    #[test]
    fn chains_dir_defaults_under_data_dir() {
        let dir = Path::new("/data");
        let mut config = EngineConfig::default();
        assert_eq!(chains_dir(&config, dir), PathBuf::from("/data/chains"));
        config.chains_dir = Some("/etc/chains".into());
        assert_eq!(chains_dir(&config, dir), PathBuf::from("/etc/chains"));
    }

    #[test]
    fn resolve_data_dir_from_env() {
        // SAFETY: no other test in this crate reads or writes this variable.
        unsafe {
            std::env::set_var(DATA_DIR_ENV, "/tmp/test-colloquy");
        }
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/tmp/test-colloquy"));
        unsafe {
            std::env::remove_var(DATA_DIR_ENV);
        }
    }
}
