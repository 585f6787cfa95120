//! Dialog execution: sessions, persistence port, actions, and the engine.
//!
//! - `session` -- lifecycle transitions on a single `DialogSession`
//! - `store` -- the `SessionStore` port and an in-memory implementation
//! - `action` -- the `ActionHandler` boundary for Action steps
//! - `recovery` -- which recovery strategies an error allows
//! - `render` -- render-instruction construction
//! - `engine` -- the per-key serialized state machine
//! - `sweeper` -- periodic timeout sweep task

pub mod action;
pub mod engine;
pub mod recovery;
pub mod render;
pub mod session;
pub mod store;
pub mod sweeper;

pub use action::{ActionContext, ActionError, ActionHandler, ActionRegistry};
pub use engine::{
    ConflictPolicy, DialogEngine, DialogOutcome, DialogReply, EngineError, EngineSettings,
    EntryContext,
};
pub use store::{InMemorySessionStore, SessionStore};
pub use sweeper::spawn_sweeper;
