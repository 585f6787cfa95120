//! Which recovery strategies an error allows.
//!
//! The menu depends on the kind of the most recent error and on the step the
//! session is stuck on. A failed non-idempotent Action never offers RETRY,
//! and CONTINUE is only offered where there is a question to go back to.

use colloquy_types::session::{ErrorKind, RecoveryStrategy};

use crate::chain::model::Step;

use RecoveryStrategy::{Cancel, Continue, Restart, Retry};

/// Strategies legal for a session in the error state.
///
/// `kind` is the most recent error kind; `step` is the current step, or
/// `None` if it no longer exists in the chain.
pub fn allowed_strategies(kind: Option<ErrorKind>, step: Option<&Step>) -> Vec<RecoveryStrategy> {
    let Some(step) = step else {
        return vec![Restart, Cancel];
    };
    let awaits_input = step.kind().awaits_input();
    let retry_safe = step.is_retry_safe();

    match kind {
        Some(ErrorKind::ChainDesign) => vec![Cancel],
        Some(ErrorKind::Validation) => vec![Continue, Retry, Restart, Cancel],
        Some(ErrorKind::InterruptedByNewCommand) if awaits_input => vec![Continue, Restart, Cancel],
        Some(ErrorKind::Timeout) if awaits_input => vec![Continue, Retry, Restart, Cancel],
        Some(ErrorKind::System | ErrorKind::Timeout | ErrorKind::InterruptedByNewCommand) | None => {
            if retry_safe {
                vec![Retry, Restart, Cancel]
            } else {
                vec![Restart, Cancel]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::builder::{ChainBuilder, StepDecl};
    use crate::chain::model::Chain;
    use colloquy_types::chain::CHAIN_END;

    fn chain() -> Chain {
        ChainBuilder::new("c")
            .start_with("ask")
            .step(StepDecl::question("ask", "?").next("charge"))
            .step(StepDecl::action("charge", "charge_card").next("lookup"))
            .step(StepDecl::action("lookup", "lookup").idempotent(true).next(CHAIN_END))
            .build()
            .unwrap()
    }

    #[test]
    fn test_non_idempotent_action_failure_never_offers_retry() {
        let c = chain();
        let allowed = allowed_strategies(Some(ErrorKind::System), c.step("charge"));
        assert_eq!(allowed, vec![Restart, Cancel]);
    }

    #[test]
    fn test_idempotent_action_failure_offers_retry() {
        let c = chain();
        let allowed = allowed_strategies(Some(ErrorKind::System), c.step("lookup"));
        assert_eq!(allowed, vec![Retry, Restart, Cancel]);
    }

    #[test]
    fn test_validation_offers_everything() {
        let c = chain();
        let allowed = allowed_strategies(Some(ErrorKind::Validation), c.step("ask"));
        assert_eq!(allowed, RecoveryStrategy::ALL.to_vec());
    }

    #[test]
    fn test_interrupted_question_offers_continue() {
        let c = chain();
        let allowed = allowed_strategies(Some(ErrorKind::InterruptedByNewCommand), c.step("ask"));
        assert_eq!(allowed, vec![Continue, Restart, Cancel]);
    }

    #[test]
    fn test_chain_design_only_cancels() {
        let c = chain();
        assert_eq!(allowed_strategies(Some(ErrorKind::ChainDesign), c.step("ask")), vec![Cancel]);
    }

    #[test]
    fn test_missing_step() {
        assert_eq!(allowed_strategies(Some(ErrorKind::System), None), vec![Restart, Cancel]);
    }
}
