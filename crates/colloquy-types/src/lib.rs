//! Shared domain types for Colloquy.
//!
//! This crate contains the declarative chain definitions, per-user dialog
//! sessions, render instructions, engine configuration, and the repository
//! error type shared by the engine and its storage adapters.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod chain;
pub mod config;
pub mod error;
pub mod render;
pub mod session;
