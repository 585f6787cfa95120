//! Dialog chain model and execution engine for Colloquy.
//!
//! This crate defines the chain model, the builder that validates chains, and
//! the engine that drives per-user sessions through them. It also defines the
//! "ports" (the `SessionStore` and `ActionHandler` traits) that the
//! infrastructure layer and the embedding application implement. It depends
//! only on `colloquy-types`, never on `colloquy-infra` or any database crate.

pub mod chain;
pub mod dialog;
