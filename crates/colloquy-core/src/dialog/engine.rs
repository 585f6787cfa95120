//! Dialog engine: interprets chains against per-key sessions.
//!
//! Every public operation takes the per-key lock, loads the session, mutates
//! it through [`SessionManager`], persists it and only then returns render
//! instructions. A crash before the store write leaves the previous state in
//! place, so the worst case is the current prompt being delivered again.
//!
//! The only long wait inside the critical section is an Action step. The
//! engine persists the session, releases the lock while the operation runs,
//! then re-acquires it and compares session id and version before committing.
//! If anything touched the session meanwhile (a cancel, a restart, the
//! timeout sweep) the action result is discarded.
//!
//! # Flow of one event
//!
//! 1. Acquire the key's mutex.
//! 2. Load the session; absent or terminal means "not handled".
//! 3. Apply the event (answer, choice, recovery, cancel).
//! 4. Drive forward through Message/Condition/Action steps until the session
//!    waits for input, errors, or terminates.
//! 5. If it terminated and a paused session rides inside, restore that one.
//! 6. Persist and return the collected renders.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use colloquy_types::chain::TimeoutPolicy;
use colloquy_types::config::EngineConfig;
use colloquy_types::error::RepositoryError;
use colloquy_types::render::{RenderInstruction, RenderKind};
use colloquy_types::session::{
    DialogSession, ErrorKind, RecoveryStrategy, SessionData, SessionKey, SessionState,
};
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::chain::expression::ConditionEvaluator;
use crate::chain::model::{Chain, Step, StepBody};
use crate::chain::registry::{ChainRegistry, RegistryError};
use crate::chain::template::render_template;
use crate::chain::transition::{ChainDesignError, Target};
use crate::chain::validator::run_validators;

use super::action::{ActionContext, ActionRegistry};
use super::recovery::allowed_strategies;
use super::render;
use super::session::SessionManager;
use super::store::SessionStore;

const UNKNOWN_OPTION: &str = "Please choose one of the offered options.";
const TIMEOUT_CANCELLED: &str = "This dialog timed out and was cancelled.";
const TIMEOUT_RESUMABLE: &str = "This dialog timed out. You can pick up where you left off.";
const CHAIN_FINISHED: &str = "Done.";
const ACTION_INTERRUPTED: &str = "action was interrupted before it reported a result";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("session store error: {0}")]
    Store(#[from] RepositoryError),

    #[error("recovery strategy '{strategy}' is not available (allowed: {allowed})")]
    InvalidRecoveryStrategy {
        strategy: RecoveryStrategy,
        allowed: String,
    },

    #[error("session {key} is {state}, not in the error state")]
    NotRecoverable { key: SessionKey, state: SessionState },
}

/// Engine tuning.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Bound on an Action step's call unless the step overrides it.
    pub action_timeout: Duration,
    /// How long terminal sessions stay in the store before the sweep evicts them.
    pub eviction_grace: chrono::Duration,
    /// Timeout for sessions whose chain is no longer registered.
    pub fallback_timeout: chrono::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            action_timeout: Duration::from_secs(config.action_timeout_secs),
            eviction_grace: seconds_or_max(i64::try_from(config.eviction_grace_secs).unwrap_or(i64::MAX)),
            fallback_timeout: seconds_or_max(config.default_timeout_secs.max(1)),
        }
    }
}

/// What to do when a key already has a live session on `start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Resume when the live session runs the same chain, supersede otherwise.
    #[default]
    ResumeOrSupersede,
    /// Always pause the live session and start fresh.
    Supersede,
}

/// Caller-supplied context for `start`.
#[derive(Debug, Clone, Default)]
pub struct EntryContext {
    /// Initial session data (e.g. fields from the triggering message).
    pub data: SessionData,
    pub policy: ConflictPolicy,
}

impl EntryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, field: impl Into<String>, value: Value) -> Self {
        self.data.insert(field.into(), value);
        self
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Renders produced for one key, plus where the session ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogReply {
    pub key: SessionKey,
    pub chain_id: String,
    pub state: SessionState,
    pub step_id: String,
    pub retry_count: u32,
    pub renders: Vec<RenderInstruction>,
}

impl DialogReply {
    fn new(session: &DialogSession, renders: Vec<RenderInstruction>) -> Self {
        Self {
            key: session.key,
            chain_id: session.chain_id.clone(),
            state: session.state,
            step_id: session.current_step_id.clone(),
            retry_count: session.retry_count,
            renders,
        }
    }
}

/// Result of handing an event to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum DialogOutcome {
    /// No live session for the key; the caller may fall through to other handlers.
    NotHandled,
    /// A live session exists but the event does not apply to it.
    Ignored { reason: String },
    Replied(DialogReply),
}

impl DialogOutcome {
    pub fn reply(&self) -> Option<&DialogReply> {
        match self {
            DialogOutcome::Replied(reply) => Some(reply),
            _ => None,
        }
    }

    pub fn renders(&self) -> &[RenderInstruction] {
        self.reply().map_or(&[], |r| r.renders.as_slice())
    }

    pub fn is_handled(&self) -> bool {
        !matches!(self, DialogOutcome::NotHandled)
    }
}

// ---------------------------------------------------------------------------
// Internal types
// ---------------------------------------------------------------------------

enum Answer<'a> {
    Text(&'a str),
    Token(&'a str),
}

/// How `drive` left the session.
enum Drive {
    /// The in-memory session is authoritative; persist it.
    Settled,
    /// Someone else changed the session while an action ran.
    Stale,
}

enum ActionOutcome {
    Merged,
    Failed(String),
    Stale,
}

type KeyGuard = Option<OwnedMutexGuard<()>>;

/// Marks an Action call running with the key's lock released. Dropping it
/// (including when the caller's future is dropped) clears the mark.
struct InFlight<'a> {
    counts: &'a DashMap<SessionKey, usize>,
    key: SessionKey,
}

impl<'a> InFlight<'a> {
    fn enter(counts: &'a DashMap<SessionKey, usize>, key: SessionKey) -> Self {
        *counts.entry(key).or_insert(0) += 1;
        Self { counts, key }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(mut count) = self.counts.get_mut(&self.key) {
            *count = count.saturating_sub(1);
        }
        self.counts.remove_if(&self.key, |_, count| *count == 0);
    }
}

// ---------------------------------------------------------------------------
// DialogEngine
// ---------------------------------------------------------------------------

/// The dialog state machine.
///
/// Generic over `S: SessionStore` for storage flexibility.
pub struct DialogEngine<S: SessionStore> {
    store: Arc<S>,
    registry: Arc<ChainRegistry>,
    actions: Arc<ActionRegistry>,
    settings: EngineSettings,
    /// Per-key mutexes serializing all operations on a session.
    locks: DashMap<SessionKey, Arc<Mutex<()>>>,
    /// Action calls currently awaiting a result, per key.
    in_flight: DashMap<SessionKey, usize>,
}

impl<S: SessionStore> DialogEngine<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<ChainRegistry>,
        actions: ActionRegistry,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            registry,
            actions: Arc::new(actions),
            settings,
            locks: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ChainRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Current session for `key`, if any.
    pub async fn session(&self, key: SessionKey) -> Result<Option<DialogSession>, EngineError> {
        Ok(self.store.get(&key).await?)
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Start (or resume) `chain_id` for `key` and execute its first step.
    pub async fn start(
        &self,
        chain_id: &str,
        key: SessionKey,
        entry: EntryContext,
    ) -> Result<DialogOutcome, EngineError> {
        let chain = self.registry.get(chain_id)?;
        let guard = Some(self.lock(key).await);
        let now = Utc::now();

        let live = self.store.get(&key).await?.filter(|s| !s.is_terminal());
        let mgr = match live {
            Some(live)
                if live.chain_id == chain.id() && entry.policy == ConflictPolicy::ResumeOrSupersede =>
            {
                tracing::info!(
                    chain_id = %chain.id(),
                    user_id = key.user_id,
                    chat_id = key.chat_id,
                    step_id = %live.current_step_id,
                    "resuming live session"
                );
                return self.resume(&chain, SessionManager::new(live), guard).await;
            }
            Some(live) => {
                tracing::info!(
                    chain_id = %chain.id(),
                    previous_chain_id = %live.chain_id,
                    user_id = key.user_id,
                    chat_id = key.chat_id,
                    error_kind = %ErrorKind::InterruptedByNewCommand,
                    "superseding live session"
                );
                let fresh = DialogSession::new(key, chain.id(), chain.start_step_id(), entry.data, now);
                SessionManager::new(live).supersede(fresh, now)
            }
            None => {
                tracing::info!(
                    chain_id = %chain.id(),
                    user_id = key.user_id,
                    chat_id = key.chat_id,
                    "starting session"
                );
                SessionManager::create(key, chain.id(), chain.start_step_id(), entry.data, now)
            }
        };

        self.run(&chain, mgr, guard, Vec::new(), false).await
    }

    /// Start the chain bound to an entry-point command. Unknown commands are
    /// not handled.
    pub async fn start_command(
        &self,
        command: &str,
        key: SessionKey,
        entry: EntryContext,
    ) -> Result<DialogOutcome, EngineError> {
        match self.registry.resolve_entry_point(command) {
            Some(chain_id) => self.start(&chain_id, key, entry).await,
            None => Ok(DialogOutcome::NotHandled),
        }
    }

    /// Free-text answer to the current Question step.
    pub async fn handle_input(&self, key: SessionKey, raw: &str) -> Result<DialogOutcome, EngineError> {
        self.answer(key, None, Answer::Text(raw)).await
    }

    /// Like `handle_input`, but ignored unless the session is still on `step_id`.
    pub async fn handle_input_for_step(
        &self,
        key: SessionKey,
        step_id: &str,
        raw: &str,
    ) -> Result<DialogOutcome, EngineError> {
        self.answer(key, Some(step_id), Answer::Text(raw)).await
    }

    /// Option token selected on the current Choice step.
    pub async fn handle_choice(&self, key: SessionKey, token: &str) -> Result<DialogOutcome, EngineError> {
        self.answer(key, None, Answer::Token(token)).await
    }

    /// Like `handle_choice`, but ignored unless the session is still on `step_id`.
    pub async fn handle_choice_for_step(
        &self,
        key: SessionKey,
        step_id: &str,
        token: &str,
    ) -> Result<DialogOutcome, EngineError> {
        self.answer(key, Some(step_id), Answer::Token(token)).await
    }

    /// Force the session to `Cancelled`. Idempotent on terminal sessions.
    pub async fn cancel(&self, key: SessionKey) -> Result<DialogOutcome, EngineError> {
        let _guard = self.lock(key).await;
        let Some(session) = self.store.get(&key).await? else {
            return Ok(DialogOutcome::NotHandled);
        };
        if session.is_terminal() {
            return Ok(DialogOutcome::Ignored {
                reason: format!("session is already {}", session.state),
            });
        }

        let mut mgr = SessionManager::new(session);
        mgr.mark_cancelled();
        tracing::info!(
            chain_id = %mgr.session().chain_id,
            step_id = %mgr.current_step_id(),
            user_id = key.user_id,
            chat_id = key.chat_id,
            "session cancelled"
        );
        let renders = vec![render::cancelled(mgr.current_step_id())];
        let reply = self.commit(mgr, renders, Utc::now()).await?;
        Ok(DialogOutcome::Replied(reply))
    }

    /// Apply a recovery strategy to a session in the error state.
    pub async fn recover(
        &self,
        key: SessionKey,
        strategy: RecoveryStrategy,
    ) -> Result<DialogOutcome, EngineError> {
        let guard = Some(self.lock(key).await);
        let Some(session) = self.store.get(&key).await? else {
            return Ok(DialogOutcome::NotHandled);
        };
        if session.is_terminal() {
            return Ok(DialogOutcome::NotHandled);
        }
        if session.state != SessionState::Error {
            return Err(EngineError::NotRecoverable {
                key,
                state: session.state,
            });
        }

        let chain = self.registry.lookup(&session.chain_id);
        let mut mgr = SessionManager::new(session);
        let step = chain.as_deref().and_then(|c| c.step(mgr.current_step_id()));
        let allowed = allowed_strategies(mgr.last_error_kind(), step);
        if !allowed.contains(&strategy) {
            let allowed = allowed
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(EngineError::InvalidRecoveryStrategy { strategy, allowed });
        }

        tracing::info!(
            chain_id = %mgr.session().chain_id,
            step_id = %mgr.current_step_id(),
            user_id = key.user_id,
            chat_id = key.chat_id,
            %strategy,
            "applying recovery strategy"
        );

        let now = Utc::now();
        match (strategy, chain.as_deref(), step) {
            (RecoveryStrategy::Continue, Some(_), Some(step)) => {
                mgr.resume_waiting();
                let renders = vec![render::prompt(step, mgr.session())];
                Ok(DialogOutcome::Replied(self.commit(mgr, renders, now).await?))
            }
            (RecoveryStrategy::Retry, Some(chain), Some(_)) => {
                mgr.reset_step();
                self.run(chain, mgr, guard, Vec::new(), false).await
            }
            (RecoveryStrategy::Restart, Some(chain), _) => {
                mgr.restart(chain.start_step_id());
                self.run(chain, mgr, guard, Vec::new(), false).await
            }
            (RecoveryStrategy::Restart, None, _) => Err(EngineError::Registry(
                RegistryError::ChainNotRegistered(mgr.session().chain_id.clone()),
            )),
            _ => {
                mgr.mark_cancelled();
                let renders = vec![render::cancelled(mgr.current_step_id())];
                Ok(DialogOutcome::Replied(self.commit(mgr, renders, now).await?))
            }
        }
    }

    /// Expire idle sessions and evict old terminal ones.
    ///
    /// A session is expired when `updated_at + chain timeout < now`. Returns
    /// one reply per expired session; delivering them is the caller's job.
    pub async fn tick_timeouts(&self, now: DateTime<Utc>) -> Result<Vec<DialogReply>, EngineError> {
        let candidates = self.store.list_active().await?;
        let mut replies = Vec::new();

        for candidate in candidates {
            if !self.is_expired(&candidate, now) {
                continue;
            }
            let key = candidate.key;
            let _guard = self.lock(key).await;

            // Re-check under the lock: the session may have moved on.
            let Some(session) = self.store.get(&key).await? else {
                continue;
            };
            if session.is_terminal() || !self.is_expired(&session, now) {
                continue;
            }

            let chain = self.registry.lookup(&session.chain_id);
            let policy = chain
                .as_deref()
                .map_or(TimeoutPolicy::Cancel, Chain::timeout_policy);
            let mut mgr = SessionManager::new(session);
            let step_id = mgr.current_step_id().to_string();
            let step = chain.as_deref().and_then(|c| c.step(&step_id));

            tracing::warn!(
                chain_id = %mgr.session().chain_id,
                step_id = %step_id,
                user_id = key.user_id,
                chat_id = key.chat_id,
                error_kind = %ErrorKind::Timeout,
                ?policy,
                "session timed out"
            );

            let message = "session idle past its timeout";
            let renders = match (policy, mgr.state()) {
                (TimeoutPolicy::Cancel, _) => {
                    mgr.push_error(ErrorKind::Timeout, message, now);
                    mgr.mark_cancelled();
                    vec![RenderInstruction::new(&step_id, RenderKind::Cancelled, TIMEOUT_CANCELLED)]
                }
                (TimeoutPolicy::Continue, SessionState::WaitingInput) if step.is_some() => {
                    mgr.push_error(ErrorKind::Timeout, message, now);
                    let mut renders = vec![render::notice(&step_id, TIMEOUT_RESUMABLE)];
                    renders.extend(step.map(|s| render::prompt(s, mgr.session())));
                    renders
                }
                (TimeoutPolicy::Continue, SessionState::Error) => {
                    vec![
                        render::notice(&step_id, TIMEOUT_RESUMABLE),
                        render::recovery_menu(mgr.session(), step),
                    ]
                }
                (TimeoutPolicy::Continue, _) => {
                    mgr.mark_error(ErrorKind::Timeout, message, now);
                    vec![render::recovery_menu(mgr.session(), step)]
                }
            };

            replies.push(self.commit(mgr, renders, now).await?);
        }

        // A grace reaching before the earliest representable date evicts nothing.
        if let Some(cutoff) = now.checked_sub_signed(self.settings.eviction_grace) {
            let purged = self.store.purge_terminal(cutoff).await?;
            if purged > 0 {
                tracing::debug!(purged, "evicted terminal sessions");
            }
        }
        self.locks.retain(|_, m| Arc::strong_count(m) > 1);

        Ok(replies)
    }

    // -----------------------------------------------------------------------
    // Event handling
    // -----------------------------------------------------------------------

    async fn answer(
        &self,
        key: SessionKey,
        expected_step: Option<&str>,
        answer: Answer<'_>,
    ) -> Result<DialogOutcome, EngineError> {
        let guard = Some(self.lock(key).await);
        let Some(session) = self.store.get(&key).await? else {
            return Ok(DialogOutcome::NotHandled);
        };
        if session.is_terminal() {
            return Ok(DialogOutcome::NotHandled);
        }
        if let Some(expected) = expected_step {
            if expected != session.current_step_id {
                tracing::debug!(
                    user_id = key.user_id,
                    chat_id = key.chat_id,
                    expected,
                    step_id = %session.current_step_id,
                    "dropping event for a step the session already left"
                );
                return Ok(DialogOutcome::Ignored {
                    reason: format!("session is no longer on step '{expected}'"),
                });
            }
        }
        if session.state != SessionState::WaitingInput {
            tracing::warn!(
                chain_id = %session.chain_id,
                step_id = %session.current_step_id,
                user_id = key.user_id,
                chat_id = key.chat_id,
                state = %session.state,
                "input while not waiting for input, ignoring"
            );
            return Ok(DialogOutcome::Ignored {
                reason: format!("session is {}, not waiting for input", session.state),
            });
        }

        let chain = self
            .registry
            .lookup(&session.chain_id)
            .ok_or_else(|| RegistryError::ChainNotRegistered(session.chain_id.clone()))?;
        let mut mgr = SessionManager::new(session);
        let now = Utc::now();

        let Some(step) = chain.step(mgr.current_step_id()) else {
            let err = ChainDesignError::UnknownStep {
                chain_id: chain.id().to_string(),
                step_id: mgr.current_step_id().to_string(),
            };
            let mut renders = Vec::new();
            self.design_failure(&chain, &mut mgr, err, &mut renders);
            return Ok(DialogOutcome::Replied(self.commit(mgr, renders, now).await?));
        };

        let value = match (&step.body, answer) {
            (StepBody::Question { validators, numeric }, Answer::Text(raw)) => {
                match run_validators(validators, raw) {
                    Ok(()) => capture(raw, *numeric),
                    Err(failed) => {
                        let message = failed.message().to_string();
                        return self.reject(&chain, step, mgr, &message, now).await;
                    }
                }
            }
            (StepBody::Choice { options }, Answer::Token(token)) => {
                if options.iter().any(|o| o.token == token) {
                    Value::String(token.to_string())
                } else {
                    return self.reject(&chain, step, mgr, UNKNOWN_OPTION, now).await;
                }
            }
            (body, _) => {
                tracing::warn!(
                    chain_id = %chain.id(),
                    step_id = %step.id,
                    user_id = key.user_id,
                    chat_id = key.chat_id,
                    step_kind = %body.kind(),
                    "unexpected input for step, ignoring"
                );
                return Ok(DialogOutcome::Ignored {
                    reason: format!("step '{}' is a {} step", step.id, body.kind()),
                });
            }
        };

        tracing::debug!(
            chain_id = %chain.id(),
            step_id = %step.id,
            user_id = key.user_id,
            chat_id = key.chat_id,
            "answer accepted"
        );
        mgr.accept(value);
        mgr.mark_active();
        self.run(&chain, mgr, guard, Vec::new(), true).await
    }

    /// Record a rejected answer; escalate to the error state at the retry limit.
    async fn reject(
        &self,
        chain: &Chain,
        step: &Step,
        mut mgr: SessionManager,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<DialogOutcome, EngineError> {
        let failures = mgr.record_validation_failure(message, now);
        let renders = if failures >= chain.max_retries_per_step() {
            mgr.escalate();
            tracing::warn!(
                chain_id = %chain.id(),
                step_id = %step.id,
                user_id = mgr.session().key.user_id,
                chat_id = mgr.session().key.chat_id,
                error_kind = %ErrorKind::Validation,
                failures,
                "retry limit reached"
            );
            vec![render::recovery_menu(mgr.session(), Some(step))]
        } else {
            vec![render::validation_error(step, mgr.session(), message)]
        };
        Ok(DialogOutcome::Replied(self.commit(mgr, renders, now).await?))
    }

    /// Re-render whatever the live session is waiting on, or continue it.
    ///
    /// An Action step is never invoked again from here: its result is either
    /// still pending or was lost, and the recovery menu decides whether a
    /// retry is safe.
    async fn resume(
        &self,
        chain: &Chain,
        mut mgr: SessionManager,
        guard: KeyGuard,
    ) -> Result<DialogOutcome, EngineError> {
        let step = chain.step(mgr.current_step_id());
        let key = mgr.session().key;
        match (mgr.state(), step) {
            (SessionState::Active, Some(step)) if matches!(step.body, StepBody::Action { .. }) => {
                if self.in_flight.contains_key(&key) {
                    tracing::debug!(
                        chain_id = %chain.id(),
                        step_id = %step.id,
                        user_id = key.user_id,
                        chat_id = key.chat_id,
                        "action still running, ignoring start"
                    );
                    return Ok(DialogOutcome::Ignored {
                        reason: format!("action step '{}' is still running", step.id),
                    });
                }
                tracing::error!(
                    chain_id = %chain.id(),
                    step_id = %step.id,
                    user_id = key.user_id,
                    chat_id = key.chat_id,
                    error_kind = %ErrorKind::System,
                    "action interrupted without a result, offering recovery"
                );
                let now = Utc::now();
                mgr.mark_error(ErrorKind::System, ACTION_INTERRUPTED, now);
                let renders = vec![render::recovery_menu(mgr.session(), Some(step))];
                Ok(DialogOutcome::Replied(self.commit(mgr, renders, now).await?))
            }
            (SessionState::WaitingInput, Some(step)) => {
                let renders = vec![render::prompt(step, mgr.session())];
                Ok(DialogOutcome::Replied(self.commit(mgr, renders, Utc::now()).await?))
            }
            (SessionState::Error, _) => {
                let renders = vec![render::recovery_menu(mgr.session(), step)];
                Ok(DialogOutcome::Replied(self.commit(mgr, renders, Utc::now()).await?))
            }
            // Created/Active: an earlier run stopped mid-way; execute the step again.
            _ => self.run(chain, mgr, guard, Vec::new(), false).await,
        }
    }

    // -----------------------------------------------------------------------
    // Step execution
    // -----------------------------------------------------------------------

    /// Drive the session, then persist it. `guard` is held until return.
    async fn run(
        &self,
        chain: &Chain,
        mut mgr: SessionManager,
        mut guard: KeyGuard,
        mut renders: Vec<RenderInstruction>,
        step_completed: bool,
    ) -> Result<DialogOutcome, EngineError> {
        match self
            .drive(chain, &mut mgr, &mut guard, &mut renders, step_completed)
            .await?
        {
            Drive::Settled => Ok(DialogOutcome::Replied(
                self.commit(mgr, renders, Utc::now()).await?,
            )),
            Drive::Stale => Ok(DialogOutcome::Ignored {
                reason: "session changed while an action was running".to_string(),
            }),
        }
    }

    /// Execute steps until the session waits for input, errors, or terminates.
    ///
    /// With `step_completed` the current step has already finished and the
    /// loop starts by resolving its transition.
    async fn drive(
        &self,
        chain: &Chain,
        mgr: &mut SessionManager,
        guard: &mut KeyGuard,
        renders: &mut Vec<RenderInstruction>,
        step_completed: bool,
    ) -> Result<Drive, EngineError> {
        let limit = chain.len() * 2 + 1;
        let mut execute = !step_completed;
        let mut hops = 0usize;

        loop {
            hops += 1;
            if hops > limit {
                let err = ChainDesignError::RunawayChain {
                    chain_id: chain.id().to_string(),
                    limit,
                };
                self.design_failure(chain, mgr, err, renders);
                return Ok(Drive::Settled);
            }

            let Some(step) = chain.step(mgr.current_step_id()) else {
                let err = ChainDesignError::UnknownStep {
                    chain_id: chain.id().to_string(),
                    step_id: mgr.current_step_id().to_string(),
                };
                self.design_failure(chain, mgr, err, renders);
                return Ok(Drive::Settled);
            };

            if execute {
                match &step.body {
                    StepBody::Message => {
                        mgr.mark_active();
                        renders.push(render::prompt(step, mgr.session()));
                    }
                    StepBody::Question { .. } | StepBody::Choice { .. } => {
                        mgr.mark_waiting();
                        renders.push(render::prompt(step, mgr.session()));
                        return Ok(Drive::Settled);
                    }
                    StepBody::Condition => mgr.mark_active(),
                    StepBody::Final => {
                        renders.push(render::completed(
                            &step.id,
                            render_template(&step.prompt, &mgr.session().data),
                        ));
                        mgr.mark_completed();
                        tracing::info!(
                            chain_id = %chain.id(),
                            step_id = %step.id,
                            user_id = mgr.session().key.user_id,
                            chat_id = mgr.session().key.chat_id,
                            "session completed"
                        );
                        return Ok(Drive::Settled);
                    }
                    StepBody::Action { .. } => {
                        mgr.mark_active();
                        match self.run_action(chain, step, mgr, guard).await? {
                            ActionOutcome::Merged => {}
                            ActionOutcome::Stale => return Ok(Drive::Stale),
                            ActionOutcome::Failed(message) => {
                                tracing::error!(
                                    chain_id = %chain.id(),
                                    step_id = %step.id,
                                    user_id = mgr.session().key.user_id,
                                    chat_id = mgr.session().key.chat_id,
                                    error_kind = %ErrorKind::System,
                                    error = %message,
                                    "action step failed"
                                );
                                mgr.mark_error(ErrorKind::System, &message, Utc::now());
                                renders.push(render::recovery_menu(mgr.session(), Some(step)));
                                return Ok(Drive::Settled);
                            }
                        }
                    }
                }
            }
            execute = true;

            match resolve_transition(step, &mgr.session().data) {
                Ok(Target::Step(next)) => mgr.move_to(&next),
                Ok(Target::End) => {
                    renders.push(render::completed(&step.id, CHAIN_FINISHED.to_string()));
                    mgr.mark_completed();
                    tracing::info!(
                        chain_id = %chain.id(),
                        step_id = %step.id,
                        user_id = mgr.session().key.user_id,
                        chat_id = mgr.session().key.chat_id,
                        "session reached chain end"
                    );
                    return Ok(Drive::Settled);
                }
                Err(err) => {
                    self.design_failure(chain, mgr, err, renders);
                    return Ok(Drive::Settled);
                }
            }
        }
    }

    /// Invoke an Action step with the key's lock released.
    async fn run_action(
        &self,
        chain: &Chain,
        step: &Step,
        mgr: &mut SessionManager,
        guard: &mut KeyGuard,
    ) -> Result<ActionOutcome, EngineError> {
        let StepBody::Action {
            operation, timeout, ..
        } = &step.body
        else {
            return Ok(ActionOutcome::Merged);
        };

        // Persist first so a cancel or a crash sees the in-flight step.
        mgr.stamp(Utc::now());
        self.store.put(mgr.session()).await?;
        let key = mgr.session().key;
        let (session_id, version) = (mgr.session().id, mgr.session().version);

        let ctx = ActionContext {
            key,
            chain_id: chain.id().to_string(),
            step_id: step.id.clone(),
            operation: operation.clone(),
            data: mgr.session().data.clone(),
        };
        let timeout = timeout.unwrap_or(self.settings.action_timeout);

        tracing::debug!(
            chain_id = %chain.id(),
            step_id = %step.id,
            operation = %operation,
            user_id = key.user_id,
            chat_id = key.chat_id,
            "invoking action"
        );

        // Held until return so the mark outlives the re-lock and version check.
        let _in_flight = InFlight::enter(&self.in_flight, key);
        guard.take();
        let result = self.actions.invoke(ctx, timeout).await;
        *guard = Some(self.lock(key).await);

        let current = self.store.get(&key).await?;
        let unchanged = current
            .as_ref()
            .is_some_and(|s| s.id == session_id && s.version == version);
        if !unchanged {
            tracing::warn!(
                chain_id = %chain.id(),
                step_id = %step.id,
                user_id = key.user_id,
                chat_id = key.chat_id,
                "session changed while action was running, discarding result"
            );
            return Ok(ActionOutcome::Stale);
        }

        Ok(match result {
            Ok(value) => {
                mgr.session_mut().data.insert(step.id.clone(), value);
                ActionOutcome::Merged
            }
            Err(e) => ActionOutcome::Failed(e.to_string()),
        })
    }

    /// A registered chain could not resolve a transition: fatal to the chain.
    fn design_failure(
        &self,
        chain: &Chain,
        mgr: &mut SessionManager,
        err: ChainDesignError,
        renders: &mut Vec<RenderInstruction>,
    ) {
        tracing::error!(
            chain_id = %chain.id(),
            step_id = %mgr.current_step_id(),
            user_id = mgr.session().key.user_id,
            chat_id = mgr.session().key.chat_id,
            error_kind = %ErrorKind::ChainDesign,
            error = %err,
            "chain design error at runtime, disabling chain"
        );
        if let Err(e) = self.registry.disable(chain.id()) {
            tracing::warn!(chain_id = %chain.id(), error = %e, "could not disable chain");
        }
        mgr.mark_error(ErrorKind::ChainDesign, &err.to_string(), Utc::now());
        renders.push(render::recovery_menu(
            mgr.session(),
            chain.step(mgr.current_step_id()),
        ));
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Restore a paused session if this one terminated, then persist.
    async fn commit(
        &self,
        mut mgr: SessionManager,
        mut renders: Vec<RenderInstruction>,
        now: DateTime<Utc>,
    ) -> Result<DialogReply, EngineError> {
        if mgr.session().is_terminal() {
            if let Some(paused) = mgr.take_suspended() {
                let restored = SessionManager::new(paused);
                let chain = self.registry.lookup(&restored.session().chain_id);
                let step = chain.as_deref().and_then(|c| c.step(restored.current_step_id()));
                tracing::info!(
                    chain_id = %restored.session().chain_id,
                    step_id = %restored.current_step_id(),
                    user_id = restored.session().key.user_id,
                    chat_id = restored.session().key.chat_id,
                    "restoring interrupted session"
                );
                renders.push(render::recovery_menu(restored.session(), step));
                mgr = restored;
            }
        }

        mgr.stamp(now);
        if let Err(e) = self.store.put(mgr.session()).await {
            tracing::error!(
                chain_id = %mgr.session().chain_id,
                step_id = %mgr.current_step_id(),
                user_id = mgr.session().key.user_id,
                chat_id = mgr.session().key.chat_id,
                error_kind = %ErrorKind::System,
                error = %e,
                "failed to persist session"
            );
            return Err(e.into());
        }
        Ok(DialogReply::new(mgr.session(), renders))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn lock(&self, key: SessionKey) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(key).or_default().clone();
        mutex.lock_owned().await
    }

    /// A deadline past the last representable date never expires.
    fn is_expired(&self, session: &DialogSession, now: DateTime<Utc>) -> bool {
        let timeout = self
            .registry
            .lookup(&session.chain_id)
            .map_or(self.settings.fallback_timeout, |c| c.timeout());
        session
            .updated_at
            .checked_add_signed(timeout)
            .is_some_and(|deadline| deadline < now)
    }
}

fn seconds_or_max(secs: i64) -> TimeDelta {
    TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX)
}

/// Resolve a step's transition. The evaluator is built per call and never
/// held across an await point.
fn resolve_transition(step: &Step, data: &SessionData) -> Result<Target, ChainDesignError> {
    let evaluator = ConditionEvaluator::new();
    step.transition.resolve(&step.id, data, &evaluator)
}

/// Value stored for an accepted Question answer.
fn capture(raw: &str, numeric: bool) -> Value {
    let trimmed = raw.trim();
    if numeric {
        if let Ok(n) = trimmed.parse::<i64>() {
            return Value::from(n);
        }
        if let Some(n) = trimmed
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
        {
            return Value::Number(n);
        }
    }
    Value::String(trimmed.to_string())
}
