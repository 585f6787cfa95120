//! Observability for Colloquy: subscriber setup and dialog span attributes.

pub mod dialog_attrs;
pub mod tracing_setup;
