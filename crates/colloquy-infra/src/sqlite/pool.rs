//! Connection pools for the session database.
//!
//! Session writes are small single-row upserts issued from under the engine's
//! per-key lock, so one writer connection is enough and keeps SQLite from
//! returning `SQLITE_BUSY` between concurrent keys. Reads (the timeout sweep's
//! `list_active`, lookups on every event, CLI listings) go through a separate
//! read-only pool, which WAL mode lets run alongside the writer.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Concurrent readers: one per sweep plus a handful of gateway lookups.
const READER_CONNECTIONS: u32 = 4;

/// How long a connection waits on a lock held by another process sharing the
/// file (a CLI `purge` next to a running engine) before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Split read/write pool for the session database.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if missing) the database at `database_url`, apply the
    /// `dialog_sessions` migrations, then open the read pool.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let write_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);
        let read_opts = write_opts.clone().read_only(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(write_opts)
            .await?;

        // The read-only pool cannot create the table, so migrate first.
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(read_opts)
            .await?;

        tracing::debug!(
            database_url,
            readers = READER_CONNECTIONS,
            "session database opened"
        );
        Ok(Self { reader, writer })
    }
}
