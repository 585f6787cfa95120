//! Protocol-agnostic render instructions.
//!
//! The engine never talks to a messaging platform. Every processed event
//! yields zero or more `RenderInstruction`s which the caller formats and
//! delivers however its protocol requires.

use serde::{Deserialize, Serialize};

/// What a render instruction represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderKind {
    /// A step prompt (Message, Question, Choice).
    Prompt,
    /// A Question/Choice re-rendered with the validation error message.
    ValidationError,
    /// The error-state menu; options are recovery strategy tokens.
    RecoveryMenu,
    /// The text of a Final step, or the implicit end of a chain.
    Completed,
    /// The session was cancelled.
    Cancelled,
    /// Informational text outside the step flow (e.g. "your session timed out").
    Notice,
}

/// A selectable option (rendered as a button by most gateways).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOption {
    /// Value delivered back to `handle_choice` / `recover`.
    pub token: String,
    pub label: String,
}

/// One message the caller should show the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderInstruction {
    /// The step this instruction originates from.
    pub step_id: String,
    pub kind: RenderKind,
    /// Text after placeholder substitution.
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<RenderOption>,
}

impl RenderInstruction {
    pub fn new(step_id: impl Into<String>, kind: RenderKind, text: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            kind,
            text: text.into(),
            options: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: Vec<RenderOption>) -> Self {
        self.options = options;
        self
    }

    /// Option tokens in display order.
    pub fn option_tokens(&self) -> Vec<&str> {
        self.options.iter().map(|o| o.token.as_str()).collect()
    }
}
