//! Fluent chain builder with whole-chain static validation.
//!
//! Step declarations are accumulated without any checks. `build()` then runs
//! a single pass that collects every violation (duplicate ids, dangling
//! targets, dead ends, bad configuration) so an author sees all problems at
//! once, and only returns a `Chain` when the list is empty.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use colloquy_types::chain::{
    Branch, ChainDefinition, ChoiceOption, StepConfig, StepDefinition, TimeoutPolicy,
    ValidatorSpec, CHAIN_END,
};
use colloquy_types::config::EngineConfig;
use thiserror::Error;

use super::model::{Chain, Step, StepBody};
use super::transition::Transition;
use super::validator::{specs_are_numeric, Validator};

/// Longest accepted chain timeout: one year.
pub const MAX_TIMEOUT_SECS: i64 = 366 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

/// One problem found by the static validation pass.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChainViolation {
    #[error("chain id is empty")]
    EmptyChainId,

    #[error("chain declares no steps")]
    NoSteps,

    #[error("no start step declared")]
    NoStartStep,

    #[error("start step '{0}' does not exist")]
    UnknownStartStep(String),

    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error("invalid step id '{0}'")]
    InvalidStepId(String),

    #[error("step '{step_id}' transitions to unknown step '{target}'")]
    UnresolvedTarget { step_id: String, target: String },

    #[error("step '{0}' is not final and has no outgoing transition")]
    NoOutgoingPath(String),

    #[error("final step '{0}' must not declare a transition")]
    FinalWithTransition(String),

    #[error("timeout must be positive, got {0}")]
    NonPositiveTimeout(i64),

    #[error("timeout of {0}s exceeds the maximum of {max}s", max = MAX_TIMEOUT_SECS)]
    TimeoutTooLong(i64),

    #[error("choice step '{0}' has no options")]
    EmptyChoice(String),

    #[error("choice step '{step_id}' repeats option token '{token}'")]
    DuplicateChoiceToken { step_id: String, token: String },

    #[error("step '{step_id}' has an invalid validator: {reason}")]
    InvalidValidator { step_id: String, reason: String },

    #[error("action step '{0}' has an empty operation name")]
    EmptyOperation(String),
}

/// Builder validation failure carrying the full violation list.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainValidationError {
    pub chain_id: String,
    pub violations: Vec<ChainViolation>,
}

impl fmt::Display for ChainValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chain '{}' failed validation with {} violation(s)",
            self.chain_id,
            self.violations.len()
        )?;
        for (i, v) in self.violations.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{v}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ChainValidationError {}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Chain settings applied when a declaration leaves them unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainDefaults {
    pub timeout_secs: i64,
    pub max_retries_per_step: u32,
}

impl Default for ChainDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 3600,
            max_retries_per_step: 3,
        }
    }
}

impl From<&EngineConfig> for ChainDefaults {
    fn from(config: &EngineConfig) -> Self {
        Self {
            timeout_secs: config.default_timeout_secs,
            max_retries_per_step: config.default_max_retries,
        }
    }
}

// ---------------------------------------------------------------------------
// Step declarations
// ---------------------------------------------------------------------------

/// A validator attached to a Question declaration.
#[derive(Debug, Clone)]
pub enum ValidatorDecl {
    /// Compiled during `build()`; a bad spec becomes a violation.
    Spec(ValidatorSpec),
    Custom(Validator),
}

#[derive(Debug, Clone)]
enum DeclBody {
    Message,
    Question {
        validators: Vec<ValidatorDecl>,
        numeric: Option<bool>,
    },
    Choice {
        options: Vec<ChoiceOption>,
    },
    Action {
        operation: String,
        idempotent: bool,
        timeout_secs: Option<u64>,
    },
    Condition,
    Final,
}

/// An unvalidated step declaration.
#[derive(Debug, Clone)]
pub struct StepDecl {
    id: String,
    prompt: String,
    body: DeclBody,
    next: Option<String>,
    branches: Vec<Branch>,
}

impl StepDecl {
    fn with_body(id: impl Into<String>, prompt: impl Into<String>, body: DeclBody) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            body,
            next: None,
            branches: Vec::new(),
        }
    }

    pub fn message(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::with_body(id, prompt, DeclBody::Message)
    }

    pub fn question(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::with_body(
            id,
            prompt,
            DeclBody::Question {
                validators: Vec::new(),
                numeric: None,
            },
        )
    }

    pub fn choice(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::with_body(id, prompt, DeclBody::Choice { options: Vec::new() })
    }

    /// An Action step; non-idempotent unless marked otherwise.
    pub fn action(id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::with_body(
            id,
            "",
            DeclBody::Action {
                operation: operation.into(),
                idempotent: false,
                timeout_secs: None,
            },
        )
    }

    pub fn condition(id: impl Into<String>) -> Self {
        Self::with_body(id, "", DeclBody::Condition)
    }

    pub fn final_step(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_body(id, text, DeclBody::Final)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn next(mut self, target: impl Into<String>) -> Self {
        self.next = Some(target.into());
        self
    }

    pub fn branch(mut self, when: impl Into<String>, goto: impl Into<String>) -> Self {
        self.branches.push(Branch {
            when: when.into(),
            goto: goto.into(),
        });
        self
    }

    /// Attach a built-in validator rule. Ignored on non-Question steps.
    pub fn validate(mut self, spec: impl Into<ValidatorSpec>) -> Self {
        if let DeclBody::Question { validators, .. } = &mut self.body {
            validators.push(ValidatorDecl::Spec(spec.into()));
        }
        self
    }

    /// Attach a custom validator. Ignored on non-Question steps.
    pub fn validator(mut self, validator: Validator) -> Self {
        if let DeclBody::Question { validators, .. } = &mut self.body {
            validators.push(ValidatorDecl::Custom(validator));
        }
        self
    }

    /// Force numeric (or textual) capture of Question answers.
    pub fn numeric(mut self, value: bool) -> Self {
        if let DeclBody::Question { numeric, .. } = &mut self.body {
            *numeric = Some(value);
        }
        self
    }

    pub fn option(mut self, token: impl Into<String>, label: impl Into<String>) -> Self {
        if let DeclBody::Choice { options } = &mut self.body {
            options.push(ChoiceOption::new(token, label));
        }
        self
    }

    pub fn idempotent(mut self, value: bool) -> Self {
        if let DeclBody::Action { idempotent, .. } = &mut self.body {
            *idempotent = value;
        }
        self
    }

    pub fn action_timeout_secs(mut self, secs: u64) -> Self {
        if let DeclBody::Action { timeout_secs, .. } = &mut self.body {
            *timeout_secs = Some(secs);
        }
        self
    }

    pub fn from_definition(def: &StepDefinition) -> Self {
        let body = match &def.config {
            StepConfig::Message {} => DeclBody::Message,
            StepConfig::Question { validators } => DeclBody::Question {
                validators: validators.iter().cloned().map(ValidatorDecl::Spec).collect(),
                numeric: None,
            },
            StepConfig::Choice { options } => DeclBody::Choice {
                options: options.clone(),
            },
            StepConfig::Action {
                operation,
                idempotent,
                timeout_secs,
            } => DeclBody::Action {
                operation: operation.clone(),
                idempotent: *idempotent,
                timeout_secs: *timeout_secs,
            },
            StepConfig::Condition {} => DeclBody::Condition,
            StepConfig::Final {} => DeclBody::Final,
        };
        Self {
            id: def.id.clone(),
            prompt: def.prompt.clone(),
            body,
            next: def.next.clone(),
            branches: def.branches.clone(),
        }
    }

    /// Compile into a step, pushing any local problems onto `violations`.
    fn compile(self, violations: &mut Vec<ChainViolation>) -> Step {
        let id = self.id;
        let body = match self.body {
            DeclBody::Message => StepBody::Message,
            DeclBody::Question {
                validators: decls,
                numeric,
            } => {
                let specs: Vec<ValidatorSpec> = decls
                    .iter()
                    .filter_map(|d| match d {
                        ValidatorDecl::Spec(s) => Some(s.clone()),
                        ValidatorDecl::Custom(_) => None,
                    })
                    .collect();
                let mut validators = Vec::with_capacity(decls.len());
                for decl in decls {
                    match decl {
                        ValidatorDecl::Custom(v) => validators.push(v),
                        ValidatorDecl::Spec(spec) => match Validator::from_spec(&spec) {
                            Ok(v) => validators.push(v),
                            Err(e) => violations.push(ChainViolation::InvalidValidator {
                                step_id: id.clone(),
                                reason: e.to_string(),
                            }),
                        },
                    }
                }
                StepBody::Question {
                    validators,
                    numeric: numeric.unwrap_or_else(|| specs_are_numeric(&specs)),
                }
            }
            DeclBody::Choice { options } => {
                if options.is_empty() {
                    violations.push(ChainViolation::EmptyChoice(id.clone()));
                }
                let mut seen = HashSet::new();
                for opt in &options {
                    if !seen.insert(opt.token.as_str()) {
                        violations.push(ChainViolation::DuplicateChoiceToken {
                            step_id: id.clone(),
                            token: opt.token.clone(),
                        });
                    }
                }
                StepBody::Choice { options }
            }
            DeclBody::Action {
                operation,
                idempotent,
                timeout_secs,
            } => {
                if operation.trim().is_empty() {
                    violations.push(ChainViolation::EmptyOperation(id.clone()));
                }
                StepBody::Action {
                    operation,
                    idempotent,
                    timeout: timeout_secs.map(Duration::from_secs),
                }
            }
            DeclBody::Condition => StepBody::Condition,
            DeclBody::Final => StepBody::Final,
        };

        let transition = Transition::from_parts(self.next, self.branches);
        match (&body, transition.is_terminal()) {
            (StepBody::Final, false) => {
                violations.push(ChainViolation::FinalWithTransition(id.clone()));
            }
            (StepBody::Final, true) => {}
            (_, true) => violations.push(ChainViolation::NoOutgoingPath(id.clone())),
            (_, false) => {}
        }

        Step {
            id,
            prompt: self.prompt,
            body,
            transition,
        }
    }
}

// ---------------------------------------------------------------------------
// ChainBuilder
// ---------------------------------------------------------------------------

/// Accumulates chain settings and step declarations.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    id: String,
    name: Option<String>,
    description: Option<String>,
    start_step: Option<String>,
    timeout_secs: Option<i64>,
    max_retries_per_step: Option<u32>,
    timeout_policy: TimeoutPolicy,
    required_permission: Option<String>,
    entry_points: Vec<String>,
    steps: Vec<StepDecl>,
    defaults: ChainDefaults,
}

impl ChainBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            start_step: None,
            timeout_secs: None,
            max_retries_per_step: None,
            timeout_policy: TimeoutPolicy::default(),
            required_permission: None,
            entry_points: Vec::new(),
            steps: Vec::new(),
            defaults: ChainDefaults::default(),
        }
    }

    /// Seed a builder from a declarative definition.
    pub fn from_definition(def: &ChainDefinition) -> Self {
        let mut builder = Self::new(def.id.clone()).start_with(def.start_step.clone());
        if !def.name.is_empty() {
            builder.name = Some(def.name.clone());
        }
        builder.description = def.description.clone();
        builder.timeout_secs = def.timeout_secs;
        builder.max_retries_per_step = def.max_retries_per_step;
        builder.timeout_policy = def.timeout_policy;
        builder.required_permission = def.required_permission.clone();
        builder.entry_points = def.entry_points.clone();
        builder.steps = def.steps.iter().map(StepDecl::from_definition).collect();
        builder
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn start_with(mut self, step_id: impl Into<String>) -> Self {
        self.start_step = Some(step_id.into());
        self
    }

    pub fn timeout_secs(mut self, secs: i64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn max_retries_per_step(mut self, retries: u32) -> Self {
        self.max_retries_per_step = Some(retries);
        self
    }

    pub fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    pub fn required_permission(mut self, tag: impl Into<String>) -> Self {
        self.required_permission = Some(tag.into());
        self
    }

    pub fn entry_point(mut self, command: impl Into<String>) -> Self {
        self.entry_points.push(command.into());
        self
    }

    /// Values used for settings the declaration leaves unset.
    pub fn defaults(mut self, defaults: ChainDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn step(mut self, step: StepDecl) -> Self {
        self.steps.push(step);
        self
    }

    /// Validate everything and produce the immutable chain.
    pub fn build(self) -> Result<Chain, ChainValidationError> {
        let mut violations = Vec::new();

        if self.id.trim().is_empty() {
            violations.push(ChainViolation::EmptyChainId);
        }
        if self.steps.is_empty() {
            violations.push(ChainViolation::NoSteps);
        }

        let timeout_secs = self.timeout_secs.unwrap_or(self.defaults.timeout_secs);
        if timeout_secs <= 0 {
            violations.push(ChainViolation::NonPositiveTimeout(timeout_secs));
        } else if timeout_secs > MAX_TIMEOUT_SECS {
            violations.push(ChainViolation::TimeoutTooLong(timeout_secs));
        }

        let mut steps: HashMap<String, Step> = HashMap::with_capacity(self.steps.len());
        let mut order = Vec::with_capacity(self.steps.len());
        for decl in self.steps {
            if decl.id.trim().is_empty() || decl.id == CHAIN_END {
                violations.push(ChainViolation::InvalidStepId(decl.id.clone()));
            }
            if steps.contains_key(&decl.id) {
                violations.push(ChainViolation::DuplicateStepId(decl.id.clone()));
                continue;
            }
            let step = decl.compile(&mut violations);
            order.push(step.id.clone());
            steps.insert(step.id.clone(), step);
        }

        for id in &order {
            let Some(step) = steps.get(id) else { continue };
            for target in step.transition.targets() {
                if target != CHAIN_END && !steps.contains_key(target) {
                    violations.push(ChainViolation::UnresolvedTarget {
                        step_id: id.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }

        let start_step_id = match self.start_step {
            Some(start) => {
                if !steps.contains_key(&start) {
                    violations.push(ChainViolation::UnknownStartStep(start.clone()));
                }
                start
            }
            None => {
                violations.push(ChainViolation::NoStartStep);
                String::new()
            }
        };

        if !violations.is_empty() {
            return Err(ChainValidationError {
                chain_id: self.id,
                violations,
            });
        }

        tracing::debug!(chain_id = %self.id, steps = order.len(), "chain built");

        Ok(Chain {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            id: self.id,
            description: self.description,
            start_step_id,
            steps,
            order,
            timeout_secs,
            max_retries_per_step: self
                .max_retries_per_step
                .unwrap_or(self.defaults.max_retries_per_step),
            timeout_policy: self.timeout_policy,
            required_permission: self.required_permission,
            entry_points: self.entry_points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_types::chain::{StepKind, ValidatorRule};

    fn greeting_chain() -> ChainBuilder {
        ChainBuilder::new("greeting")
            .start_with("greeting")
            .step(StepDecl::message("greeting", "Hello!").next("ask_name"))
            .step(
                StepDecl::question("ask_name", "What is your name?")
                    .validate(ValidatorRule::NotEmpty)
                    .next("final"),
            )
            .step(StepDecl::final_step("final", "Hi {ask_name}"))
    }

    #[test]
    fn test_valid_chain_builds() {
        let chain = greeting_chain().build().unwrap();
        assert_eq!(chain.id(), "greeting");
        assert_eq!(chain.name(), "greeting");
        assert_eq!(chain.start_step_id(), "greeting");
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.timeout_secs(), 3600);
        assert_eq!(chain.max_retries_per_step(), 3);
        let kinds: Vec<StepKind> = chain.steps().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec![StepKind::Message, StepKind::Question, StepKind::Final]);
    }

    #[test]
    fn test_collects_all_violations() {
        let err = ChainBuilder::new("broken")
            .start_with("missing")
            .timeout_secs(0)
            .step(StepDecl::message("a", "x").next("nowhere"))
            .step(StepDecl::message("a", "dup").next("b"))
            .step(StepDecl::question("b", "?"))
            .step(StepDecl::final_step("c", "done").next("a"))
            .build()
            .unwrap_err();

        let v = &err.violations;
        assert!(v.contains(&ChainViolation::NonPositiveTimeout(0)));
        assert!(v.contains(&ChainViolation::DuplicateStepId("a".into())));
        assert!(v.contains(&ChainViolation::UnresolvedTarget {
            step_id: "a".into(),
            target: "nowhere".into()
        }));
        assert!(v.contains(&ChainViolation::NoOutgoingPath("b".into())));
        assert!(v.contains(&ChainViolation::FinalWithTransition("c".into())));
        assert!(v.contains(&ChainViolation::UnknownStartStep("missing".into())));
        assert_eq!(v.len(), 6, "got: {err}");
    }

    #[test]
    fn test_missing_start_is_reported() {
        let err = ChainBuilder::new("x")
            .step(StepDecl::final_step("end", "bye"))
            .build()
            .unwrap_err();
        assert_eq!(err.violations, vec![ChainViolation::NoStartStep]);
    }

    #[test]
    fn test_timeout_upper_bound() {
        let build = |secs| {
            ChainBuilder::new("big")
                .start_with("end")
                .timeout_secs(secs)
                .step(StepDecl::final_step("end", "bye"))
                .build()
        };
        let err = build(i64::MAX).unwrap_err();
        assert_eq!(err.violations, vec![ChainViolation::TimeoutTooLong(i64::MAX)]);
        assert!(build(MAX_TIMEOUT_SECS + 1).is_err());
        assert_eq!(build(MAX_TIMEOUT_SECS).unwrap().timeout_secs(), MAX_TIMEOUT_SECS);
    }

    #[test]
    fn test_branch_targets_are_checked() {
        let err = ChainBuilder::new("x")
            .start_with("route")
            .step(
                StepDecl::condition("route")
                    .branch("age >= 18", "adult")
                    .next("ghost"),
            )
            .step(StepDecl::final_step("adult", "ok"))
            .build()
            .unwrap_err();
        assert_eq!(
            err.violations,
            vec![ChainViolation::UnresolvedTarget {
                step_id: "route".into(),
                target: "ghost".into()
            }]
        );
    }

    #[test]
    fn test_chain_end_is_a_valid_target() {
        let chain = ChainBuilder::new("x")
            .start_with("hello")
            .step(StepDecl::message("hello", "hi").next(CHAIN_END))
            .build();
        assert!(chain.is_ok());
    }

    #[test]
    fn test_choice_and_action_checks() {
        let err = ChainBuilder::new("x")
            .start_with("pick")
            .step(
                StepDecl::choice("pick", "Pick one")
                    .option("a", "A")
                    .option("a", "Again A")
                    .next("empty"),
            )
            .step(StepDecl::choice("empty", "none").next("act"))
            .step(StepDecl::action("act", " ").next(CHAIN_END))
            .build()
            .unwrap_err();
        assert!(err.violations.contains(&ChainViolation::DuplicateChoiceToken {
            step_id: "pick".into(),
            token: "a".into()
        }));
        assert!(err.violations.contains(&ChainViolation::EmptyChoice("empty".into())));
        assert!(err.violations.contains(&ChainViolation::EmptyOperation("act".into())));
    }

    #[test]
    fn test_invalid_validator_spec_is_a_violation() {
        let err = ChainBuilder::new("x")
            .start_with("q")
            .step(
                StepDecl::question("q", "?")
                    .validate(ValidatorRule::Regex {
                        pattern: "(".into(),
                    })
                    .next(CHAIN_END),
            )
            .build()
            .unwrap_err();
        assert!(matches!(
            err.violations[0],
            ChainViolation::InvalidValidator { .. }
        ));
    }

    #[test]
    fn test_numeric_capture_inferred_from_specs() {
        let chain = ChainBuilder::new("x")
            .start_with("age")
            .step(
                StepDecl::question("age", "Age?")
                    .validate(ValidatorRule::Integer)
                    .next(CHAIN_END),
            )
            .build()
            .unwrap();
        match &chain.step("age").unwrap().body {
            StepBody::Question { numeric, .. } => assert!(*numeric),
            other => panic!("expected question, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_apply_only_when_unset() {
        let defaults = ChainDefaults {
            timeout_secs: 60,
            max_retries_per_step: 1,
        };
        let chain = greeting_chain().defaults(defaults).build().unwrap();
        assert_eq!(chain.timeout_secs(), 60);
        assert_eq!(chain.max_retries_per_step(), 1);

        let chain = greeting_chain()
            .defaults(defaults)
            .timeout_secs(10)
            .build()
            .unwrap();
        assert_eq!(chain.timeout_secs(), 10);
    }

    #[test]
    fn test_every_reachable_step_has_a_path() {
        let chain = ChainBuilder::new("x")
            .start_with("q")
            .step(StepDecl::question("q", "?").next("route"))
            .step(
                StepDecl::condition("route")
                    .branch("q == 'a'", "done")
                    .next("q"),
            )
            .step(StepDecl::final_step("done", "ok"))
            .build()
            .unwrap();

        let mut stack = vec![chain.start_step_id().to_string()];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let step = chain.step(&id).expect("reachable step must exist");
            if step.kind() == StepKind::Final {
                continue;
            }
            let targets = step.transition.targets();
            assert!(!targets.is_empty(), "step {id} has no outgoing path");
            for t in targets {
                if t != CHAIN_END {
                    stack.push(t.to_string());
                }
            }
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_validation_error_display_lists_violations() {
        let err = ChainBuilder::new("x").build().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("chain 'x' failed validation"), "got: {msg}");
        assert!(msg.contains("no start step declared"), "got: {msg}");
    }
}
