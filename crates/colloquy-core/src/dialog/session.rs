//! Session manager for dialog sessions.
//!
//! Wraps a `DialogSession` with the lifecycle transitions the engine applies.
//! All mutation of a session's state, retry counter and error history goes
//! through here so the transitions stay in one auditable place.

use chrono::{DateTime, Utc};
use colloquy_types::session::{
    DialogSession, ErrorKind, ErrorRecord, SessionData, SessionKey, SessionState,
};
use serde_json::Value;

/// Manages the lifecycle of a single dialog session.
#[derive(Debug, Clone)]
pub struct SessionManager {
    session: DialogSession,
}

impl SessionManager {
    pub fn new(session: DialogSession) -> Self {
        Self { session }
    }

    /// Create a fresh session positioned on `start_step_id`.
    pub fn create(
        key: SessionKey,
        chain_id: &str,
        start_step_id: &str,
        data: SessionData,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(DialogSession::new(key, chain_id, start_step_id, data, now))
    }

    pub fn session(&self) -> &DialogSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut DialogSession {
        &mut self.session
    }

    pub fn into_inner(self) -> DialogSession {
        self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn current_step_id(&self) -> &str {
        &self.session.current_step_id
    }

    // -----------------------------------------------------------------------
    // Step progress
    // -----------------------------------------------------------------------

    /// Move to `step_id` and mark the session as executing.
    pub fn move_to(&mut self, step_id: &str) {
        self.session.current_step_id = step_id.to_string();
        self.session.state = SessionState::Active;
    }

    pub fn mark_active(&mut self) {
        self.session.state = SessionState::Active;
    }

    /// Suspend until the user answers the current step.
    pub fn mark_waiting(&mut self) {
        self.session.state = SessionState::WaitingInput;
    }

    /// Store an accepted value for the current step and clear the retry counter.
    pub fn accept(&mut self, value: Value) {
        let step_id = self.session.current_step_id.clone();
        self.session.data.insert(step_id, value);
        self.session.retry_count = 0;
    }

    /// Record a rejected answer. Returns the new consecutive-failure count.
    pub fn record_validation_failure(&mut self, message: &str, now: DateTime<Utc>) -> u32 {
        self.session.retry_count += 1;
        self.push_error(ErrorKind::Validation, message, now);
        self.session.retry_count
    }

    // -----------------------------------------------------------------------
    // Errors
    // -----------------------------------------------------------------------

    /// Append to the error history without changing state.
    pub fn push_error(&mut self, kind: ErrorKind, message: &str, now: DateTime<Utc>) {
        self.session.error_history.push(ErrorRecord {
            kind,
            step_id: self.session.current_step_id.clone(),
            message: message.to_string(),
            timestamp: now,
        });
    }

    /// Record an error and enter the error state.
    pub fn mark_error(&mut self, kind: ErrorKind, message: &str, now: DateTime<Utc>) {
        self.push_error(kind, message, now);
        self.session.state = SessionState::Error;
    }

    /// Enter the error state for the most recently recorded error.
    pub fn escalate(&mut self) {
        self.session.state = SessionState::Error;
    }

    pub fn last_error_kind(&self) -> Option<ErrorKind> {
        self.session.last_error().map(|e| e.kind)
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Back to waiting at the same step, data untouched.
    pub fn resume_waiting(&mut self) {
        self.session.retry_count = 0;
        self.session.state = SessionState::WaitingInput;
    }

    /// Re-execute the current step from scratch.
    pub fn reset_step(&mut self) {
        self.session.retry_count = 0;
        self.session.state = SessionState::Active;
    }

    /// Clear all data and return to the start step in `Created`.
    pub fn restart(&mut self, start_step_id: &str) {
        self.session.data.clear();
        self.session.retry_count = 0;
        self.session.current_step_id = start_step_id.to_string();
        self.session.state = SessionState::Created;
    }

    // -----------------------------------------------------------------------
    // Termination
    // -----------------------------------------------------------------------

    pub fn mark_completed(&mut self) {
        self.session.state = SessionState::Completed;
    }

    pub fn mark_cancelled(&mut self) {
        self.session.state = SessionState::Cancelled;
    }

    // -----------------------------------------------------------------------
    // Superseding
    // -----------------------------------------------------------------------

    /// Pause this session for `replacement`: this one moves to the error
    /// state (kind `InterruptedByNewCommand`) and rides inside the
    /// replacement until that one terminates.
    pub fn supersede(mut self, mut replacement: DialogSession, now: DateTime<Utc>) -> Self {
        let message = format!("interrupted by chain '{}'", replacement.chain_id);
        self.mark_error(ErrorKind::InterruptedByNewCommand, &message, now);
        replacement.suspended = Some(Box::new(self.session));
        Self::new(replacement)
    }

    /// Detach the paused session, if any.
    pub fn take_suspended(&mut self) -> Option<DialogSession> {
        self.session.suspended.take().map(|s| *s)
    }

    // -----------------------------------------------------------------------
    // Persistence bookkeeping
    // -----------------------------------------------------------------------

    /// Bump the version and touch `updated_at` ahead of a store write.
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        self.session.version += 1;
        self.session.updated_at = now;
    }
}
