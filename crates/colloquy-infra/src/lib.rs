//! Infrastructure layer for Colloquy.
//!
//! Contains the SQLite implementation of the `SessionStore` port defined in
//! `colloquy-core` and the `config.toml` loader.

pub mod config;
pub mod sqlite;
