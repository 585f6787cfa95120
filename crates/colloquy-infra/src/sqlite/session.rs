//! SQLite session store implementation.
//!
//! Implements `SessionStore` from `colloquy-core`. One row per
//! `(user_id, chat_id)`; session data, error history and the suspended
//! session are stored as JSON text.

use chrono::{DateTime, SecondsFormat, Utc};
use colloquy_core::dialog::store::SessionStore;
use colloquy_types::error::RepositoryError;
use colloquy_types::session::{DialogSession, ErrorRecord, SessionData, SessionKey, SessionState};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

const TERMINAL_STATES: &str = "('completed', 'cancelled')";

/// SQLite-backed implementation of `SessionStore`.
pub struct SqliteSessionStore {
    pool: DatabasePool,
}

impl SqliteSessionStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Every stored session, live or terminal, most recently updated first.
    pub async fn list_all(&self) -> Result<Vec<DialogSession>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM dialog_sessions ORDER BY updated_at DESC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        rows_into_sessions(&rows)
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct SessionRow {
    user_id: i64,
    chat_id: i64,
    id: String,
    chain_id: String,
    current_step_id: String,
    state: String,
    retry_count: i64,
    data: String,
    error_history: String,
    suspended: Option<String>,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            user_id: row.try_get("user_id")?,
            chat_id: row.try_get("chat_id")?,
            id: row.try_get("id")?,
            chain_id: row.try_get("chain_id")?,
            current_step_id: row.try_get("current_step_id")?,
            state: row.try_get("state")?,
            retry_count: row.try_get("retry_count")?,
            data: row.try_get("data")?,
            error_history: row.try_get("error_history")?,
            suspended: row.try_get("suspended")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_session(self) -> Result<DialogSession, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid session id: {e}")))?;
        let state: SessionState = self
            .state
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let data: SessionData = serde_json::from_str(&self.data)
            .map_err(|e| RepositoryError::Serialization(format!("invalid session data: {e}")))?;
        let error_history: Vec<ErrorRecord> = serde_json::from_str(&self.error_history)
            .map_err(|e| RepositoryError::Serialization(format!("invalid error history: {e}")))?;
        let suspended = match self.suspended.as_deref() {
            Some(json) => Some(Box::new(serde_json::from_str::<DialogSession>(json).map_err(
                |e| RepositoryError::Serialization(format!("invalid suspended session: {e}")),
            )?)),
            None => None,
        };

        Ok(DialogSession {
            id,
            key: SessionKey::new(self.user_id, self.chat_id),
            chain_id: self.chain_id,
            current_step_id: self.current_step_id,
            data,
            state,
            retry_count: u32::try_from(self.retry_count).unwrap_or(0),
            error_history,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            version: u64::try_from(self.version).unwrap_or(0),
            suspended,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width UTC timestamps so `updated_at` compares correctly as text.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T, what: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|e| RepositoryError::Serialization(format!("failed to serialize {what}: {e}")))
}

fn rows_into_sessions(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<DialogSession>, RepositoryError> {
    let mut sessions = Vec::with_capacity(rows.len());
    for row in rows {
        let session_row =
            SessionRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        sessions.push(session_row.into_session()?);
    }
    Ok(sessions)
}

// ---------------------------------------------------------------------------
// SessionStore implementation
// ---------------------------------------------------------------------------

impl SessionStore for SqliteSessionStore {
    async fn get(&self, key: &SessionKey) -> Result<Option<DialogSession>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM dialog_sessions WHERE user_id = ? AND chat_id = ?")
            .bind(key.user_id)
            .bind(key.chat_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let session_row =
                    SessionRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(session_row.into_session()?))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, session: &DialogSession) -> Result<(), RepositoryError> {
        let data = to_json(&session.data, "session data")?;
        let error_history = to_json(&session.error_history, "error history")?;
        let suspended = session
            .suspended
            .as_deref()
            .map(|s| to_json(s, "suspended session"))
            .transpose()?;
        let version = i64::try_from(session.version)
            .map_err(|e| RepositoryError::Serialization(format!("version out of range: {e}")))?;

        sqlx::query(
            r#"INSERT INTO dialog_sessions
                   (user_id, chat_id, id, chain_id, current_step_id, state, retry_count,
                    data, error_history, suspended, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (user_id, chat_id) DO UPDATE SET
                   id = excluded.id,
                   chain_id = excluded.chain_id,
                   current_step_id = excluded.current_step_id,
                   state = excluded.state,
                   retry_count = excluded.retry_count,
                   data = excluded.data,
                   error_history = excluded.error_history,
                   suspended = excluded.suspended,
                   version = excluded.version,
                   created_at = excluded.created_at,
                   updated_at = excluded.updated_at"#,
        )
        .bind(session.key.user_id)
        .bind(session.key.chat_id)
        .bind(session.id.to_string())
        .bind(&session.chain_id)
        .bind(&session.current_step_id)
        .bind(session.state.to_string())
        .bind(i64::from(session.retry_count))
        .bind(&data)
        .bind(&error_history)
        .bind(&suspended)
        .bind(version)
        .bind(format_datetime(&session.created_at))
        .bind(format_datetime(&session.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM dialog_sessions WHERE user_id = ? AND chat_id = ?")
            .bind(key.user_id)
            .bind(key.chat_id)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_active(&self) -> Result<Vec<DialogSession>, RepositoryError> {
        let sql = format!(
            "SELECT * FROM dialog_sessions WHERE state NOT IN {TERMINAL_STATES} ORDER BY updated_at"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        rows_into_sessions(&rows)
    }

    async fn purge_terminal(&self, older_than: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let sql = format!(
            "DELETE FROM dialog_sessions WHERE state IN {TERMINAL_STATES} AND updated_at < ?"
        );
        let result = sqlx::query(&sql)
            .bind(format_datetime(&older_than))
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_types::session::ErrorKind;
    use serde_json::json;

    async fn test_store() -> SqliteSessionStore {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        SqliteSessionStore::new(DatabasePool::new(&url).await.unwrap())
    }

    fn session(user_id: i64, chat_id: i64, state: SessionState) -> DialogSession {
        let mut data = SessionData::new();
        data.insert("ask_name".into(), json!("Alice"));
        data.insert("profile".into(), json!({"age": 30, "tags": ["a", "b"]}));
        let mut s = DialogSession::new(
            SessionKey::new(user_id, chat_id),
            "greeting",
            "ask_name",
            data,
            Utc::now(),
        );
        s.state = state;
        s
    }

    #[tokio::test]
    async fn test_put_and_get_preserves_every_field() {
        let store = test_store().await;
        let mut s = session(1, 10, SessionState::Error);
        s.retry_count = 2;
        s.version = 7;
        s.error_history.push(ErrorRecord {
            kind: ErrorKind::Validation,
            step_id: "ask_name".into(),
            message: "This field cannot be empty".into(),
            timestamp: Utc::now(),
        });
        s.suspended = Some(Box::new(session(1, 10, SessionState::Error)));

        store.put(&s).await.unwrap();
        let loaded = store.get(&s.key).await.unwrap().unwrap();

        assert_eq!(loaded.id, s.id);
        assert_eq!(loaded.key, s.key);
        assert_eq!(loaded.state, SessionState::Error);
        assert_eq!(loaded.retry_count, 2);
        assert_eq!(loaded.version, 7);
        assert_eq!(loaded.data, s.data);
        assert_eq!(loaded.error_history.len(), 1);
        assert_eq!(loaded.error_history[0].kind, ErrorKind::Validation);
        assert_eq!(loaded.suspended.as_ref().unwrap().id, s.suspended.as_ref().unwrap().id);
        assert_eq!(
            loaded.updated_at.timestamp_micros(),
            s.updated_at.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn test_put_replaces_existing_row_for_key() {
        let store = test_store().await;
        let first = session(2, 20, SessionState::WaitingInput);
        store.put(&first).await.unwrap();

        let mut second = session(2, 20, SessionState::Active);
        second.chain_id = "support".into();
        store.put(&second).await.unwrap();

        let loaded = store.get(&SessionKey::new(2, 20)).await.unwrap().unwrap();
        assert_eq!(loaded.id, second.id);
        assert_eq!(loaded.chain_id, "support");
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = test_store().await;
        assert!(store.get(&SessionKey::new(9, 9)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = test_store().await;
        let s = session(3, 30, SessionState::Active);
        store.put(&s).await.unwrap();
        assert!(store.delete(&s.key).await.unwrap());
        assert!(!store.delete(&s.key).await.unwrap());
        assert!(store.get(&s.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_active_excludes_terminal() {
        let store = test_store().await;
        store.put(&session(1, 1, SessionState::WaitingInput)).await.unwrap();
        store.put(&session(1, 2, SessionState::Error)).await.unwrap();
        store.put(&session(1, 3, SessionState::Completed)).await.unwrap();
        store.put(&session(1, 4, SessionState::Cancelled)).await.unwrap();

        let mut chats: Vec<i64> = store
            .list_active()
            .await
            .unwrap()
            .iter()
            .map(|s| s.key.chat_id)
            .collect();
        chats.sort_unstable();
        assert_eq!(chats, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_purge_terminal_respects_cutoff() {
        let store = test_store().await;
        let now = Utc::now();

        let mut old_done = session(1, 1, SessionState::Completed);
        old_done.updated_at = now - chrono::Duration::seconds(600);
        let mut fresh_done = session(1, 2, SessionState::Cancelled);
        fresh_done.updated_at = now;
        let mut old_live = session(1, 3, SessionState::WaitingInput);
        old_live.updated_at = now - chrono::Duration::seconds(600);
        for s in [&old_done, &fresh_done, &old_live] {
            store.put(s).await.unwrap();
        }

        let purged = store
            .purge_terminal(now - chrono::Duration::seconds(300))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.get(&old_done.key).await.unwrap().is_none());
        assert!(store.get(&fresh_done.key).await.unwrap().is_some());
        assert!(store.get(&old_live.key).await.unwrap().is_some());
    }
}
