//! Render-instruction construction.

use colloquy_types::render::{RenderInstruction, RenderKind, RenderOption};
use colloquy_types::session::{DialogSession, ErrorKind, RecoveryStrategy};

use crate::chain::model::Step;
use crate::chain::template::render_template;

use super::recovery::allowed_strategies;

pub const CANCELLED_TEXT: &str = "Dialog cancelled.";

/// The step's prompt, with options for Choice steps.
pub fn prompt(step: &Step, session: &DialogSession) -> RenderInstruction {
    RenderInstruction::new(
        &step.id,
        RenderKind::Prompt,
        render_template(&step.prompt, &session.data),
    )
    .with_options(choice_options(step))
}

/// The step re-rendered after a rejected answer.
pub fn validation_error(step: &Step, session: &DialogSession, message: &str) -> RenderInstruction {
    let prompt = render_template(&step.prompt, &session.data);
    let text = if prompt.is_empty() {
        message.to_string()
    } else {
        format!("{message}\n\n{prompt}")
    };
    RenderInstruction::new(&step.id, RenderKind::ValidationError, text)
        .with_options(choice_options(step))
}

/// Menu of the strategies legal for the session's current error.
pub fn recovery_menu(session: &DialogSession, step: Option<&Step>) -> RenderInstruction {
    let last = session.last_error();
    let summary = match last {
        Some(record) => match record.kind {
            ErrorKind::Validation => "Too many invalid answers.".to_string(),
            ErrorKind::Timeout => "This dialog timed out.".to_string(),
            ErrorKind::System => format!("Something went wrong: {}", record.message),
            ErrorKind::ChainDesign => "This dialog is temporarily unavailable.".to_string(),
            ErrorKind::InterruptedByNewCommand => {
                format!("You have an unfinished dialog ({}).", session.chain_id)
            }
        },
        None => "Something went wrong.".to_string(),
    };
    let options = allowed_strategies(last.map(|r| r.kind), step)
        .into_iter()
        .map(strategy_option)
        .collect();
    RenderInstruction::new(
        &session.current_step_id,
        RenderKind::RecoveryMenu,
        format!("{summary} What would you like to do?"),
    )
    .with_options(options)
}

pub fn completed(step_id: &str, text: String) -> RenderInstruction {
    RenderInstruction::new(step_id, RenderKind::Completed, text)
}

pub fn cancelled(step_id: &str) -> RenderInstruction {
    RenderInstruction::new(step_id, RenderKind::Cancelled, CANCELLED_TEXT)
}

pub fn notice(step_id: &str, text: impl Into<String>) -> RenderInstruction {
    RenderInstruction::new(step_id, RenderKind::Notice, text)
}

fn choice_options(step: &Step) -> Vec<RenderOption> {
    step.options()
        .iter()
        .map(|o| RenderOption {
            token: o.token.clone(),
            label: o.display_label().to_string(),
        })
        .collect()
}

fn strategy_option(strategy: RecoveryStrategy) -> RenderOption {
    RenderOption {
        token: strategy.to_string(),
        label: strategy.label().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::builder::{ChainBuilder, StepDecl};
    use chrono::Utc;
    use colloquy_types::chain::CHAIN_END;
    use colloquy_types::session::{SessionData, SessionKey};
    use serde_json::json;

    fn chain() -> crate::chain::Chain {
        ChainBuilder::new("c")
            .start_with("plan")
            .step(
                StepDecl::choice("plan", "Pick a plan, {name}")
                    .option("free", "Free")
                    .option("pro", "")
                    .next("pay"),
            )
            .step(StepDecl::action("pay", "charge").next(CHAIN_END))
            .build()
            .unwrap()
    }

    fn session() -> DialogSession {
        let mut data = SessionData::new();
        data.insert("name".into(), json!("Ann"));
        DialogSession::new(SessionKey::new(1, 1), "c", "plan", data, Utc::now())
    }

    #[test]
    fn test_choice_prompt_carries_options() {
        let c = chain();
        let r = prompt(c.step("plan").unwrap(), &session());
        assert_eq!(r.kind, RenderKind::Prompt);
        assert_eq!(r.text, "Pick a plan, Ann");
        assert_eq!(r.option_tokens(), vec!["free", "pro"]);
        assert_eq!(r.options[1].label, "pro");
    }

    #[test]
    fn test_validation_error_prefixes_message() {
        let c = chain();
        let r = validation_error(c.step("plan").unwrap(), &session(), "Unknown option");
        assert_eq!(r.kind, RenderKind::ValidationError);
        assert_eq!(r.text, "Unknown option\n\nPick a plan, Ann");
    }

    #[test]
    fn test_recovery_menu_tokens_are_strategy_names() {
        let c = chain();
        let mut s = session();
        s.current_step_id = "pay".into();
        s.error_history.push(colloquy_types::session::ErrorRecord {
            kind: ErrorKind::System,
            step_id: "pay".into(),
            message: "card declined".into(),
            timestamp: Utc::now(),
        });
        let r = recovery_menu(&s, c.step("pay"));
        assert_eq!(r.kind, RenderKind::RecoveryMenu);
        assert!(r.text.contains("card declined"), "got: {}", r.text);
        assert_eq!(r.option_tokens(), vec!["restart", "cancel"]);
    }
}
