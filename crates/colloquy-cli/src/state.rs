//! Application state for the session commands.
//!
//! Pins the engine's store generic to the SQLite implementation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use colloquy_core::chain::{ChainDefaults, ChainRegistry};
use colloquy_core::dialog::{ActionRegistry, DialogEngine, EngineSettings};
use colloquy_infra::config::database_url;
use colloquy_infra::sqlite::pool::DatabasePool;
use colloquy_infra::sqlite::session::SqliteSessionStore;
use colloquy_types::config::EngineConfig;

pub type ConcreteEngine = DialogEngine<SqliteSessionStore>;

pub struct AppState {
    pub data_dir: PathBuf,
    pub config: EngineConfig,
    pub store: Arc<SqliteSessionStore>,
}

impl AppState {
    /// Create the data directory and open the session database.
    ///
    /// `db_override` wins over the configured and default database URLs.
    pub async fn init(
        data_dir: PathBuf,
        config: EngineConfig,
        db_override: Option<String>,
    ) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let url = db_override.unwrap_or_else(|| database_url(&config, &data_dir));
        let pool = DatabasePool::new(&url)
            .await
            .with_context(|| format!("failed to open session database {url}"))?;

        Ok(Self {
            data_dir,
            config,
            store: Arc::new(SqliteSessionStore::new(pool)),
        })
    }

    pub fn chain_defaults(&self) -> ChainDefaults {
        ChainDefaults::from(&self.config)
    }

    /// An engine over the shared store with the given chains and actions.
    pub fn engine(&self, registry: Arc<ChainRegistry>, actions: ActionRegistry) -> ConcreteEngine {
        DialogEngine::new(
            Arc::clone(&self.store),
            registry,
            actions,
            EngineSettings::from(&self.config),
        )
    }
}
