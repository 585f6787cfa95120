//! The compiled, immutable chain.
//!
//! A `Chain` can only be produced by [`ChainBuilder::build`](super::ChainBuilder::build),
//! so holding one means the graph checks have passed. It carries no interior
//! mutability and is shared between sessions behind an `Arc`.

use std::collections::HashMap;
use std::time::Duration;

use colloquy_types::chain::{ChoiceOption, StepKind, TimeoutPolicy};

use super::transition::Transition;
use super::validator::Validator;

/// A validated dialog chain.
#[derive(Debug, Clone)]
pub struct Chain {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) start_step_id: String,
    pub(crate) steps: HashMap<String, Step>,
    /// Step ids in declaration order.
    pub(crate) order: Vec<String>,
    pub(crate) timeout_secs: i64,
    pub(crate) max_retries_per_step: u32,
    pub(crate) timeout_policy: TimeoutPolicy,
    pub(crate) required_permission: Option<String>,
    pub(crate) entry_points: Vec<String>,
}

impl Chain {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn start_step_id(&self) -> &str {
        &self.start_step_id
    }

    pub fn timeout_secs(&self) -> i64 {
        self.timeout_secs
    }

    /// Saturates at `TimeDelta::MAX` for values chrono cannot represent.
    pub fn timeout(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::try_seconds(self.timeout_secs).unwrap_or(chrono::TimeDelta::MAX)
    }

    pub fn max_retries_per_step(&self) -> u32 {
        self.max_retries_per_step
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        self.timeout_policy
    }

    /// Opaque permission tag; stored for callers, never enforced here.
    pub fn required_permission(&self) -> Option<&str> {
        self.required_permission.as_deref()
    }

    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }

    pub fn start_step(&self) -> Option<&Step> {
        self.steps.get(&self.start_step_id)
    }

    /// Steps in declaration order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.order.iter().filter_map(|id| self.steps.get(id))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// One compiled step.
#[derive(Debug, Clone)]
pub struct Step {
    pub id: String,
    pub prompt: String,
    pub body: StepBody,
    pub transition: Transition,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        self.body.kind()
    }

    /// Options rendered with the prompt (Choice steps only).
    pub fn options(&self) -> &[ChoiceOption] {
        match &self.body {
            StepBody::Choice { options } => options,
            _ => &[],
        }
    }

    /// A failed Action step that may be re-run without duplicate side effects.
    pub fn is_retry_safe(&self) -> bool {
        match &self.body {
            StepBody::Action { idempotent, .. } => *idempotent,
            _ => true,
        }
    }
}

/// Variant payload of a compiled step.
#[derive(Debug, Clone)]
pub enum StepBody {
    Message,
    Question {
        validators: Vec<Validator>,
        /// Accepted answers are stored as JSON numbers instead of strings.
        numeric: bool,
    },
    Choice {
        options: Vec<ChoiceOption>,
    },
    Action {
        operation: String,
        idempotent: bool,
        timeout: Option<Duration>,
    },
    Condition,
    Final,
}

impl StepBody {
    pub fn kind(&self) -> StepKind {
        match self {
            StepBody::Message => StepKind::Message,
            StepBody::Question { .. } => StepKind::Question,
            StepBody::Choice { .. } => StepKind::Choice,
            StepBody::Action { .. } => StepKind::Action,
            StepBody::Condition => StepKind::Condition,
            StepBody::Final => StepKind::Final,
        }
    }
}
