//! Chain definition types for Colloquy.
//!
//! `ChainDefinition` is the declarative, serializable description of one
//! conversational flow. YAML files and the programmatic builder both end up
//! here before the core crate validates and compiles them into an immutable
//! chain. Nothing in this module performs validation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Synthetic transition target meaning "the chain is finished".
///
/// A step whose transition resolves to this id completes the session without
/// rendering a Final step.
pub const CHAIN_END: &str = "@end";

// ---------------------------------------------------------------------------
// Chain Definition
// ---------------------------------------------------------------------------

/// The declarative definition of a dialog chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDefinition {
    /// Chain identifier, unique within a registry (e.g. "user-registration").
    pub id: String,
    /// Human-readable chain name.
    #[serde(default)]
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Id of the step executed when a session starts.
    pub start_step: String,
    /// Idle timeout for sessions of this chain, in seconds. Must be positive.
    /// Falls back to the engine default when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<i64>,
    /// Consecutive validation failures tolerated on one step before the
    /// session moves to the error state. Falls back to the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries_per_step: Option<u32>,
    /// What happens to a session once it has been idle past `timeout_secs`.
    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,
    /// Opaque permission tag. Stored and exposed, never enforced by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_permission: Option<String>,
    /// Commands that start this chain (e.g. "/start", "register").
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_points: Vec<String>,
    /// Step declarations in authoring order.
    pub steps: Vec<StepDefinition>,
}

/// Policy applied by the timeout sweep after a session expires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Expired sessions are cancelled.
    #[default]
    Cancel,
    /// Expired sessions stay resumable at the step they were waiting on.
    Continue,
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// One node of a chain.
///
/// The variant-specific payload is flattened into the step, so YAML reads:
/// ```yaml
/// - id: ask_name
///   type: question
///   prompt: "What is your name?"
///   validators:
///     - rule: not_empty
///   next: final
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step id, unique within the chain.
    pub id: String,
    /// Prompt template with `{field}` placeholders resolved against session data.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prompt: String,
    /// Variant payload.
    #[serde(flatten)]
    pub config: StepConfig,
    /// Fixed next step. When `branches` is non-empty this is the fallback
    /// taken if no branch matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Conditional transitions, evaluated top to bottom, first match wins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<Branch>,
}

impl StepDefinition {
    /// The variant tag of this step.
    pub fn kind(&self) -> StepKind {
        self.config.kind()
    }
}

/// A conditional transition: when `when` evaluates truthy, go to `goto`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Boolean expression over the session data.
    pub when: String,
    /// Target step id (or [`CHAIN_END`]).
    pub goto: String,
}

/// Variant-specific step payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    /// Display-only; advances as soon as it has been rendered.
    Message {},
    /// Free-form input checked by an ordered validator list.
    Question {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        validators: Vec<ValidatorSpec>,
    },
    /// Selection from an enumerated option set.
    Choice { options: Vec<ChoiceOption> },
    /// External operation whose result is merged into the session data.
    Action {
        /// Name of the operation in the engine's action registry.
        operation: String,
        /// Whether re-running the operation is free of duplicate side effects.
        #[serde(default)]
        idempotent: bool,
        /// Per-call timeout override in seconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
    /// Pure routing on the accumulated data; never rendered.
    Condition {},
    /// Terminal step.
    Final {},
}

impl StepConfig {
    pub fn kind(&self) -> StepKind {
        match self {
            StepConfig::Message {} => StepKind::Message,
            StepConfig::Question { .. } => StepKind::Question,
            StepConfig::Choice { .. } => StepKind::Choice,
            StepConfig::Action { .. } => StepKind::Action,
            StepConfig::Condition {} => StepKind::Condition,
            StepConfig::Final {} => StepKind::Final,
        }
    }
}

/// Tag-only view of a step variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Message,
    Question,
    Choice,
    Action,
    Condition,
    Final,
}

impl StepKind {
    /// Whether a step of this kind suspends the session until the user answers.
    pub fn awaits_input(self) -> bool {
        matches!(self, StepKind::Question | StepKind::Choice)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepKind::Message => "message",
            StepKind::Question => "question",
            StepKind::Choice => "choice",
            StepKind::Action => "action",
            StepKind::Condition => "condition",
            StepKind::Final => "final",
        };
        f.write_str(s)
    }
}

/// One selectable option of a Choice step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    /// Token delivered back when the option is selected; captured into data.
    pub token: String,
    /// Button label. Defaults to the token when omitted.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
}

impl ChoiceOption {
    pub fn new(token: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            label: label.into(),
        }
    }

    /// The label to display, falling back to the token.
    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.token
        } else {
            &self.label
        }
    }
}

// ---------------------------------------------------------------------------
// Validator specs
// ---------------------------------------------------------------------------

/// Serializable declaration of a built-in validator.
///
/// `message` overrides the rule's default error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSpec {
    #[serde(flatten)]
    pub rule: ValidatorRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<ValidatorRule> for ValidatorSpec {
    fn from(rule: ValidatorRule) -> Self {
        Self {
            rule,
            message: None,
        }
    }
}

/// Built-in validation rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidatorRule {
    NotEmpty,
    MinLength { min: usize },
    MaxLength { max: usize },
    Integer,
    NumericRange {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Regex { pattern: String },
    OneOf {
        values: Vec<String>,
        #[serde(default)]
        case_sensitive: bool,
    },
    ContainsAny {
        words: Vec<String>,
        #[serde(default)]
        case_sensitive: bool,
    },
    Email,
    Phone,
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRATION_YAML: &str = r#"
id: registration
name: Registration
start_step: greeting
timeout_secs: 600
entry_points: ["/start", "register"]
steps:
  - id: greeting
    type: message
    prompt: "Welcome!"
    next: ask_age
  - id: ask_age
    type: question
    prompt: "How old are you?"
    validators:
      - rule: not_empty
      - rule: numeric_range
        min: 14
        max: 99
        message: "Age must be between 14 and 99"
    next: route
  - id: route
    type: condition
    branches:
      - when: "ask_age >= 18"
        goto: adult
    next: minor
  - id: adult
    type: final
    prompt: "Welcome aboard"
  - id: minor
    type: final
    prompt: "Ask a parent"
"#;

    #[test]
    fn test_chain_definition_yaml_parses_flattened_steps() {
        let def: ChainDefinition = serde_yaml_ng::from_str(REGISTRATION_YAML).unwrap();
        assert_eq!(def.id, "registration");
        assert_eq!(def.timeout_secs, Some(600));
        assert!(def.max_retries_per_step.is_none());
        assert_eq!(def.timeout_policy, TimeoutPolicy::Cancel);
        assert_eq!(def.steps.len(), 5);

        let ask_age = &def.steps[1];
        assert_eq!(ask_age.kind(), StepKind::Question);
        match &ask_age.config {
            StepConfig::Question { validators } => {
                assert_eq!(validators.len(), 2);
                assert_eq!(validators[0].rule, ValidatorRule::NotEmpty);
                assert_eq!(
                    validators[1].message.as_deref(),
                    Some("Age must be between 14 and 99")
                );
            }
            other => panic!("expected question, got {other:?}"),
        }

        let route = &def.steps[2];
        assert_eq!(route.kind(), StepKind::Condition);
        assert_eq!(route.branches.len(), 1);
        assert_eq!(route.next.as_deref(), Some("minor"));
    }

    #[test]
    fn test_action_step_defaults_to_non_idempotent() {
        let yaml = r#"
id: save
type: action
operation: save_profile
next: "@end"
"#;
        let step: StepDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        match step.config {
            StepConfig::Action {
                operation,
                idempotent,
                timeout_secs,
            } => {
                assert_eq!(operation, "save_profile");
                assert!(!idempotent);
                assert!(timeout_secs.is_none());
            }
            other => panic!("expected action, got {other:?}"),
        }
        assert_eq!(step.next.as_deref(), Some(CHAIN_END));
    }

    #[test]
    fn test_choice_option_label_falls_back_to_token() {
        let opt = ChoiceOption::new("yes", "");
        assert_eq!(opt.display_label(), "yes");
        let opt = ChoiceOption::new("yes", "Sure!");
        assert_eq!(opt.display_label(), "Sure!");
    }

    #[test]
    fn test_step_kind_awaits_input() {
        assert!(StepKind::Question.awaits_input());
        assert!(StepKind::Choice.awaits_input());
        assert!(!StepKind::Message.awaits_input());
        assert!(!StepKind::Action.awaits_input());
        assert!(!StepKind::Condition.awaits_input());
        assert!(!StepKind::Final.awaits_input());
    }

    #[test]
    fn test_timeout_policy_continue_parses() {
        let yaml = r#"
id: support
start_step: done
timeout_policy: continue
steps:
  - id: done
    type: final
"#;
        let def: ChainDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(def.timeout_policy, TimeoutPolicy::Continue);
        assert!(def.timeout_secs.is_none());
    }
}
