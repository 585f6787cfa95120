//! CLI command definitions for the `colloquy` binary.

pub mod actions;
pub mod chain;
pub mod commands;
pub mod render;
pub mod run;
pub mod session;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Build, validate and run dialog chains.
#[derive(Parser)]
#[command(name = "colloquy", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Session database URL (overrides config.toml).
    #[arg(long, global = true, env = "COLLOQUY_DATABASE_URL")]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a chain definition file and report every problem found.
    Validate {
        /// Path to a chain YAML file.
        file: PathBuf,
    },

    /// List the chains defined under a directory.
    #[command(alias = "ls")]
    List {
        /// Directory to scan (defaults to the configured chains directory).
        dir: Option<PathBuf>,
    },

    /// Run a chain interactively on the console.
    Run {
        /// Path to a chain YAML file.
        file: PathBuf,

        /// User id half of the session key.
        #[arg(long, default_value_t = 1)]
        user: i64,

        /// Chat id half of the session key.
        #[arg(long, default_value_t = 1)]
        chat: i64,
    },

    /// List stored sessions (live ones unless --all).
    Sessions {
        /// Include completed and cancelled sessions.
        #[arg(long)]
        all: bool,
    },

    /// Cancel the session of a user in a chat.
    Cancel {
        #[arg(long)]
        user: i64,

        #[arg(long)]
        chat: i64,
    },

    /// Delete completed and cancelled sessions.
    Purge {
        /// Only sessions idle at least this long (defaults to the eviction grace).
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        <Cli as clap::CommandFactory>::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_global_flags() {
        let cli = Cli::try_parse_from([
            "colloquy", "run", "chains/registration.yaml", "--user", "7", "--chat", "9", "--db",
            "sqlite://x.db", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.db.as_deref(), Some("sqlite://x.db"));
        match cli.command {
            Commands::Run { file, user, chat } => {
                assert_eq!(file, PathBuf::from("chains/registration.yaml"));
                assert_eq!((user, chat), (7, 9));
            }
            _ => panic!("expected run"),
        }
    }
}
