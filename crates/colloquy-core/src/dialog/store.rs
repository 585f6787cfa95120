//! Session store trait definition and an in-memory implementation.
//!
//! The engine is the only caller. It serializes every operation on a key, so
//! an implementation only needs per-call atomicity, not transactions.
//! The infrastructure layer (colloquy-infra) provides the SQLite version.

use chrono::{DateTime, Utc};
use colloquy_types::error::RepositoryError;
use colloquy_types::session::{DialogSession, SessionKey};
use dashmap::DashMap;

/// Persistence port for dialog sessions, one record per `(user_id, chat_id)`.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait SessionStore: Send + Sync {
    /// Load the session for `key`, live or terminal.
    fn get(
        &self,
        key: &SessionKey,
    ) -> impl std::future::Future<Output = Result<Option<DialogSession>, RepositoryError>> + Send;

    /// Insert or replace the session stored under `session.key`.
    fn put(
        &self,
        session: &DialogSession,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete the session for `key`. Returns `true` if it existed.
    fn delete(
        &self,
        key: &SessionKey,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// All sessions that are not completed or cancelled.
    fn list_active(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<DialogSession>, RepositoryError>> + Send;

    /// Delete terminal sessions last updated before `older_than`.
    /// Returns the number removed.
    fn purge_terminal(
        &self,
        older_than: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}

/// Process-local store backed by a `DashMap`. Used in tests and by embedders
/// that do not need persistence across restarts.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionKey, DialogSession>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    async fn get(&self, key: &SessionKey) -> Result<Option<DialogSession>, RepositoryError> {
        Ok(self.sessions.get(key).map(|s| s.value().clone()))
    }

    async fn put(&self, session: &DialogSession) -> Result<(), RepositoryError> {
        self.sessions.insert(session.key, session.clone());
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, RepositoryError> {
        Ok(self.sessions.remove(key).is_some())
    }

    async fn list_active(&self) -> Result<Vec<DialogSession>, RepositoryError> {
        let mut active: Vec<DialogSession> = self
            .sessions
            .iter()
            .filter(|s| !s.is_terminal())
            .map(|s| s.value().clone())
            .collect();
        active.sort_by_key(|s| s.key);
        Ok(active)
    }

    async fn purge_terminal(&self, older_than: DateTime<Utc>) -> Result<u64, RepositoryError> {
        // Counted inside the closure: other keys may be inserted meanwhile.
        let mut purged = 0u64;
        self.sessions.retain(|_, s| {
            let evict = s.is_terminal() && s.updated_at < older_than;
            purged += u64::from(evict);
            !evict
        });
        Ok(purged)
    }
}
