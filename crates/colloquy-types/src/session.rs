//! Dialog session types for Colloquy.
//!
//! A `DialogSession` is the mutable per-(user, chat) record of progress
//! through one chain. Only the engine and the session store read or write it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Captured session data: field name -> value.
pub type SessionData = Map<String, Value>;

// ---------------------------------------------------------------------------
// SessionKey
// ---------------------------------------------------------------------------

/// Identity of a conversation: at most one live session exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: i64,
    pub chat_id: i64,
}

impl SessionKey {
    pub fn new(user_id: i64, chat_id: i64) -> Self {
        Self { user_id, chat_id }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.chat_id)
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle state of a dialog session.
///
/// `Created -> Active <-> WaitingInput -> Completed`, with `Error` reachable
/// from `Active`/`WaitingInput` and left only through a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Active,
    WaitingInput,
    Error,
    Completed,
    Cancelled,
}

impl SessionState {
    /// Completed and cancelled sessions never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Cancelled)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Created => write!(f, "created"),
            SessionState::Active => write!(f, "active"),
            SessionState::WaitingInput => write!(f, "waiting_input"),
            SessionState::Error => write!(f, "error"),
            SessionState::Completed => write!(f, "completed"),
            SessionState::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(SessionState::Created),
            "active" => Ok(SessionState::Active),
            "waiting_input" => Ok(SessionState::WaitingInput),
            "error" => Ok(SessionState::Error),
            "completed" => Ok(SessionState::Completed),
            "cancelled" => Ok(SessionState::Cancelled),
            other => Err(format!("invalid session state: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors recorded on a session
// ---------------------------------------------------------------------------

/// Classification of a failure recorded in a session's error history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input rejected by a validator or an unknown choice token.
    Validation,
    /// Session idle past the chain's timeout.
    Timeout,
    /// Action failure or another infrastructure failure.
    System,
    /// A transition could not be resolved in a registered chain.
    ChainDesign,
    /// Another chain was started while this session was live.
    InterruptedByNewCommand,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::System => write!(f, "system"),
            ErrorKind::ChainDesign => write!(f, "chain_design"),
            ErrorKind::InterruptedByNewCommand => write!(f, "interrupted_by_new_command"),
        }
    }
}

/// One entry of the append-only error history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub step_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// RecoveryStrategy
// ---------------------------------------------------------------------------

/// The ways out of the error state, offered to the user as a menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Resume waiting for input at the same step, keeping all data.
    Continue,
    /// Execute the same step again from scratch.
    Retry,
    /// Start the chain over with empty data.
    Restart,
    /// Cancel the session.
    Cancel,
}

impl RecoveryStrategy {
    pub const ALL: [RecoveryStrategy; 4] = [
        RecoveryStrategy::Continue,
        RecoveryStrategy::Retry,
        RecoveryStrategy::Restart,
        RecoveryStrategy::Cancel,
    ];

    /// Default button label for the recovery menu.
    pub fn label(self) -> &'static str {
        match self {
            RecoveryStrategy::Continue => "Continue from the current step",
            RecoveryStrategy::Retry => "Try this step again",
            RecoveryStrategy::Restart => "Start over",
            RecoveryStrategy::Cancel => "Cancel",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryStrategy::Continue => write!(f, "continue"),
            RecoveryStrategy::Retry => write!(f, "retry"),
            RecoveryStrategy::Restart => write!(f, "restart"),
            RecoveryStrategy::Cancel => write!(f, "cancel"),
        }
    }
}

impl FromStr for RecoveryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "continue" => Ok(RecoveryStrategy::Continue),
            "retry" => Ok(RecoveryStrategy::Retry),
            "restart" => Ok(RecoveryStrategy::Restart),
            "cancel" => Ok(RecoveryStrategy::Cancel),
            other => Err(format!("invalid recovery strategy: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// DialogSession
// ---------------------------------------------------------------------------

/// Progress of one user through one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogSession {
    /// UUIDv7 assigned when the session is created.
    pub id: Uuid,
    pub key: SessionKey,
    pub chain_id: String,
    pub current_step_id: String,
    /// Captured values keyed by step id (or declared field name).
    #[serde(default)]
    pub data: SessionData,
    pub state: SessionState,
    /// Consecutive validation failures on the current step.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub error_history: Vec<ErrorRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every persisted mutation.
    #[serde(default)]
    pub version: u64,
    /// A session paused by this one (kind `InterruptedByNewCommand`), restored
    /// when this session terminates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended: Option<Box<DialogSession>>,
}

impl DialogSession {
    /// Create a fresh session in the `Created` state.
    pub fn new(
        key: SessionKey,
        chain_id: impl Into<String>,
        start_step_id: impl Into<String>,
        data: SessionData,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            key,
            chain_id: chain_id.into(),
            current_step_id: start_step_id.into(),
            data,
            state: SessionState::Created,
            retry_count: 0,
            error_history: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
            suspended: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// The most recent error, if any.
    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.error_history.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_session() -> DialogSession {
        let mut data = SessionData::new();
        data.insert("ask_name".to_string(), json!("Alice"));
        DialogSession::new(SessionKey::new(42, 7), "greeting", "ask_name", data, Utc::now())
    }

    #[test]
    fn test_new_session_starts_created() {
        let session = sample_session();
        assert_eq!(session.state, SessionState::Created);
        assert_eq!(session.retry_count, 0);
        assert_eq!(session.version, 0);
        assert!(session.error_history.is_empty());
        assert!(session.suspended.is_none());
        assert_eq!(session.created_at, session.updated_at);
    }

    #[test]
    fn test_session_json_roundtrip_with_suspended() {
        let mut outer = sample_session();
        let mut inner = sample_session();
        inner.state = SessionState::Error;
        inner.error_history.push(ErrorRecord {
            kind: ErrorKind::InterruptedByNewCommand,
            step_id: "ask_name".to_string(),
            message: "superseded".to_string(),
            timestamp: Utc::now(),
        });
        outer.suspended = Some(Box::new(inner.clone()));

        let json = serde_json::to_string(&outer).unwrap();
        let back: DialogSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outer);
        assert_eq!(back.suspended.unwrap().last_error().unwrap().kind, ErrorKind::InterruptedByNewCommand);
    }

    #[test]
    fn test_session_state_display_and_parse() {
        for state in [
            SessionState::Created,
            SessionState::Active,
            SessionState::WaitingInput,
            SessionState::Error,
            SessionState::Completed,
            SessionState::Cancelled,
        ] {
            let parsed: SessionState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
        assert!("paused".parse::<SessionState>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(!SessionState::Error.is_terminal());
        assert!(!SessionState::WaitingInput.is_terminal());
    }

    #[test]
    fn test_recovery_strategy_parse_is_case_insensitive() {
        assert_eq!("Retry".parse::<RecoveryStrategy>().unwrap(), RecoveryStrategy::Retry);
        assert_eq!(" cancel ".parse::<RecoveryStrategy>().unwrap(), RecoveryStrategy::Cancel);
        assert!("resume".parse::<RecoveryStrategy>().is_err());
    }

    #[test]
    fn test_session_key_display() {
        assert_eq!(SessionKey::new(1, -100).to_string(), "1:-100");
    }
}
