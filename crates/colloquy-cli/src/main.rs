//! Colloquy command-line entry point.
//!
//! Binary name: `colloquy`
//!
//! Loads configuration, sets up tracing, then dispatches to the command
//! handlers. Chain validation and listing work without a database; the
//! session commands open the SQLite store.

mod cli;
mod state;

use clap::Parser;
use colloquy_core::chain::ChainDefaults;
use colloquy_infra::config::{chains_dir, load_engine_config, resolve_data_dir};
use colloquy_observe::tracing_setup::{init_tracing, shutdown_tracing};
use colloquy_types::session::SessionKey;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,colloquy_core=debug,colloquy_infra=debug",
        _ => "trace",
    };

    let data_dir = resolve_data_dir();
    let config = load_engine_config(&data_dir).await;
    init_tracing(filter, config.log_format, config.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let defaults = ChainDefaults::from(&config);

    let result = match cli.command {
        Commands::Validate { file } => cli::chain::validate_chain(&file, defaults, cli.json),

        Commands::List { dir } => {
            let dir = dir.unwrap_or_else(|| chains_dir(&config, &data_dir));
            cli::chain::list_chains(&dir, defaults, cli.json)
        }

        Commands::Run { file, user, chat } => {
            let state = AppState::init(data_dir, config, cli.db).await?;
            cli::run::run_chain(&state, &file, SessionKey::new(user, chat), cli.json).await
        }

        Commands::Sessions { all } => {
            let state = AppState::init(data_dir, config, cli.db).await?;
            cli::session::list_sessions(&state, all, cli.json).await
        }

        Commands::Cancel { user, chat } => {
            let state = AppState::init(data_dir, config, cli.db).await?;
            cli::session::cancel_session(&state, SessionKey::new(user, chat), cli.json).await
        }

        Commands::Purge { older_than_secs } => {
            let state = AppState::init(data_dir, config, cli.db).await?;
            cli::session::purge_sessions(&state, older_than_secs, cli.json).await
        }
    };

    shutdown_tracing();
    result
}
