//! Outgoing-transition rules and their resolution.
//!
//! Resolution happens once a step completes (message rendered, input
//! accepted, action settled, choice made). Conditional branches are tried
//! in declaration order and the first truthy expression wins; the default
//! target is the fallback. A conditional transition with no matching branch
//! and no default is a [`ChainDesignError`].

use colloquy_types::chain::{Branch, CHAIN_END};
use colloquy_types::session::SessionData;
use thiserror::Error;

use super::expression::ConditionEvaluator;

/// A runtime failure that static validation should have prevented.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainDesignError {
    #[error("no branch of step '{step_id}' matched and no default target is declared")]
    NoMatchingBranch { step_id: String },

    #[error("step '{step_id}' has no outgoing transition")]
    NoTransition { step_id: String },

    #[error("step '{step_id}' is not part of chain '{chain_id}'")]
    UnknownStep { chain_id: String, step_id: String },

    #[error("chain '{chain_id}' advanced through {limit} steps without waiting for input")]
    RunawayChain { chain_id: String, limit: usize },
}

/// Where a resolved transition leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Step(String),
    End,
}

impl Target {
    pub fn parse(id: &str) -> Self {
        if id == CHAIN_END {
            Target::End
        } else {
            Target::Step(id.to_string())
        }
    }
}

/// The compiled outgoing-transition rule of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Always go to this step id (or [`CHAIN_END`]).
    Next(String),
    /// First matching branch wins, then `default`.
    Conditional {
        branches: Vec<Branch>,
        default: Option<String>,
    },
    /// No outgoing path. Only valid for Final steps.
    Terminal,
}

impl Transition {
    /// Build from the `next`/`branches` pair of a declaration.
    pub fn from_parts(next: Option<String>, branches: Vec<Branch>) -> Self {
        match (next, branches.is_empty()) {
            (next, false) => Transition::Conditional {
                branches,
                default: next,
            },
            (Some(next), true) => Transition::Next(next),
            (None, true) => Transition::Terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Transition::Terminal)
    }

    /// Every target this transition can lead to.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Transition::Next(target) => vec![target.as_str()],
            Transition::Conditional { branches, default } => branches
                .iter()
                .map(|b| b.goto.as_str())
                .chain(default.as_deref())
                .collect(),
            Transition::Terminal => Vec::new(),
        }
    }

    /// Pick the next target for `step_id` given the accumulated data.
    ///
    /// A branch whose expression fails to evaluate counts as not matching.
    pub fn resolve(
        &self,
        step_id: &str,
        data: &SessionData,
        evaluator: &ConditionEvaluator,
    ) -> Result<Target, ChainDesignError> {
        match self {
            Transition::Next(target) => Ok(Target::parse(target)),
            Transition::Conditional { branches, default } => {
                for branch in branches {
                    match evaluator.evaluate(&branch.when, data) {
                        Ok(true) => return Ok(Target::parse(&branch.goto)),
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(
                                step_id,
                                expression = %branch.when,
                                error = %e,
                                "branch condition failed to evaluate, treating as no match"
                            );
                        }
                    }
                }
                default
                    .as_deref()
                    .map(Target::parse)
                    .ok_or_else(|| ChainDesignError::NoMatchingBranch {
                        step_id: step_id.to_string(),
                    })
            }
            Transition::Terminal => Err(ChainDesignError::NoTransition {
                step_id: step_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn branch(when: &str, goto: &str) -> Branch {
        Branch {
            when: when.to_string(),
            goto: goto.to_string(),
        }
    }

    fn age(n: i64) -> SessionData {
        let mut data = SessionData::new();
        data.insert("age".to_string(), json!(n));
        data
    }

    #[test]
    fn test_from_parts() {
        assert_eq!(Transition::from_parts(None, vec![]), Transition::Terminal);
        assert_eq!(
            Transition::from_parts(Some("b".into()), vec![]),
            Transition::Next("b".into())
        );
        assert!(matches!(
            Transition::from_parts(Some("b".into()), vec![branch("x", "c")]),
            Transition::Conditional { default: Some(_), .. }
        ));
    }

    #[test]
    fn test_first_matching_branch_wins() {
        let eval = ConditionEvaluator::new();
        let t = Transition::from_parts(
            Some("minor".into()),
            vec![branch("age >= 65", "senior"), branch("age >= 18", "adult")],
        );
        assert_eq!(t.resolve("route", &age(70), &eval).unwrap(), Target::Step("senior".into()));
        assert_eq!(t.resolve("route", &age(30), &eval).unwrap(), Target::Step("adult".into()));
        assert_eq!(t.resolve("route", &age(10), &eval).unwrap(), Target::Step("minor".into()));
    }

    #[test]
    fn test_no_match_without_default_is_design_error() {
        let eval = ConditionEvaluator::new();
        let t = Transition::from_parts(None, vec![branch("age >= 18", "adult")]);
        let err = t.resolve("route", &age(3), &eval).unwrap_err();
        assert_eq!(
            err,
            ChainDesignError::NoMatchingBranch {
                step_id: "route".into()
            }
        );
    }

    #[test]
    fn test_broken_expression_counts_as_no_match() {
        let eval = ConditionEvaluator::new();
        let t = Transition::from_parts(Some("fallback".into()), vec![branch("age >=", "adult")]);
        assert_eq!(t.resolve("route", &age(30), &eval).unwrap(), Target::Step("fallback".into()));
    }

    #[test]
    fn test_chain_end_target() {
        let eval = ConditionEvaluator::new();
        let t = Transition::Next(CHAIN_END.to_string());
        assert_eq!(t.resolve("last", &SessionData::new(), &eval).unwrap(), Target::End);
    }

    #[test]
    fn test_targets_lists_branches_then_default() {
        let t = Transition::from_parts(Some("d".into()), vec![branch("x", "a"), branch("y", "b")]);
        assert_eq!(t.targets(), vec!["a", "b", "d"]);
        assert!(Transition::Terminal.targets().is_empty());
    }
}
