//! Interactive console run loop.
//!
//! The console plays the part of a messaging gateway: each line becomes a
//! start/input/choice/recover/cancel event for one session key, and the
//! engine's render instructions are printed back. The timeout sweeper runs
//! in the background and prints whatever it expires.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colloquy_core::chain::StepBody;
use colloquy_core::chain::definition::load_chain_file;
use colloquy_core::chain::registry::ChainRegistry;
use colloquy_core::dialog::{
    DialogEngine, DialogOutcome, EngineError, EntryContext, SessionStore, spawn_sweeper,
};
use colloquy_observe::dialog_attrs::{DIALOG_STATE, turn_span};
use colloquy_types::session::{RecoveryStrategy, SessionKey, SessionState};
use console::style;
use rustyline_async::{Readline, ReadlineEvent, SharedWriter};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::state::AppState;

use super::actions::demo_actions;
use super::commands::{self, RunCommand};
use super::render::{format_outcome, format_reply};

/// One event handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    Start,
    Input(String),
    Choice(String),
    Recover(RecoveryStrategy),
    Cancel,
}

impl Turn {
    pub fn name(&self) -> &'static str {
        match self {
            Turn::Start => "start",
            Turn::Input(_) => "input",
            Turn::Choice(_) => "choice",
            Turn::Recover(_) => "recover",
            Turn::Cancel => "cancel",
        }
    }
}

/// Decide what typed text means for the session's current position.
///
/// On a Choice step the text is taken as an option token; in the error
/// state a strategy name applies that strategy; anything else is an answer.
pub async fn classify<S: SessionStore>(
    engine: &DialogEngine<S>,
    key: SessionKey,
    text: &str,
) -> Result<Turn, EngineError> {
    let Some(session) = engine.session(key).await? else {
        return Ok(Turn::Input(text.to_string()));
    };

    match session.state {
        SessionState::Error => match text.parse::<RecoveryStrategy>() {
            Ok(strategy) => Ok(Turn::Recover(strategy)),
            Err(_) => Ok(Turn::Input(text.to_string())),
        },
        SessionState::WaitingInput => {
            let on_choice = engine
                .registry()
                .lookup(&session.chain_id)
                .and_then(|chain| {
                    chain
                        .step(&session.current_step_id)
                        .map(|step| matches!(step.body, StepBody::Choice { .. }))
                })
                .unwrap_or(false);
            if on_choice {
                Ok(Turn::Choice(text.to_string()))
            } else {
                Ok(Turn::Input(text.to_string()))
            }
        }
        _ => Ok(Turn::Input(text.to_string())),
    }
}

/// Apply one turn inside a `dialog.turn` span.
pub async fn apply<S: SessionStore>(
    engine: &DialogEngine<S>,
    key: SessionKey,
    chain_id: &str,
    turn: Turn,
) -> Result<DialogOutcome, EngineError> {
    let step_id = engine
        .session(key)
        .await?
        .map(|s| s.current_step_id)
        .unwrap_or_default();
    let span = turn_span(turn.name(), key.user_id, key.chat_id, chain_id, &step_id);

    let outcome = async {
        match turn {
            Turn::Start => engine.start(chain_id, key, EntryContext::new()).await,
            Turn::Input(text) => engine.handle_input(key, &text).await,
            Turn::Choice(token) => engine.handle_choice(key, &token).await,
            Turn::Recover(strategy) => engine.recover(key, strategy).await,
            Turn::Cancel => engine.cancel(key).await,
        }
    }
    .instrument(span.clone())
    .await;

    if let Ok(DialogOutcome::Replied(reply)) = &outcome {
        span.record(DIALOG_STATE, tracing::field::display(reply.state));
    }
    outcome
}

/// Run `file` interactively for `key` until `/quit` or end of input.
pub async fn run_chain(state: &AppState, file: &Path, key: SessionKey, json: bool) -> Result<()> {
    let chain = load_chain_file(file, state.chain_defaults())
        .with_context(|| format!("failed to load {}", file.display()))?;
    let chain_id = chain.id().to_string();
    let chain_name = chain.name().to_string();

    let registry = Arc::new(ChainRegistry::new());
    registry.register(chain)?;
    let engine = Arc::new(state.engine(registry, demo_actions()));

    let prompt = format!("{} ", style(">").cyan().bold());
    let (mut rl, mut writer) =
        Readline::new(prompt).map_err(|e| anyhow::anyhow!("Failed to initialize input: {e}"))?;

    let cancel = CancellationToken::new();
    let sweeper = {
        let writer = writer.clone();
        spawn_sweeper(
            Arc::clone(&engine),
            Duration::from_secs(state.config.sweep_interval_secs.max(1)),
            cancel.clone(),
            move |replies| {
                let mut writer = writer.clone();
                for reply in replies {
                    let _ = write!(writer, "{}", format_reply(&reply));
                }
            },
        )
    };

    let _ = writeln!(
        writer,
        "\n  {} {} as user {} in chat {} {}\n",
        style("▶").green().bold(),
        style(if chain_name.is_empty() { &chain_id } else { &chain_name }).cyan(),
        key.user_id,
        key.chat_id,
        style("(/help for commands)").dim()
    );

    show(&mut writer, apply(&engine, key, &chain_id, Turn::Start).await, json);

    loop {
        let line = match rl.readline().await {
            Ok(ReadlineEvent::Line(line)) => line.trim().to_string(),
            Ok(ReadlineEvent::Eof | ReadlineEvent::Interrupted) | Err(_) => break,
        };
        if line.is_empty() {
            continue;
        }
        rl.add_history_entry(line.clone());

        let turn = match commands::parse(&line) {
            Some(RunCommand::Quit) => break,
            Some(RunCommand::Help) => {
                let _ = write!(writer, "{}", commands::help_text());
                continue;
            }
            Some(RunCommand::Status) => {
                print_status(&mut writer, &engine, key).await;
                continue;
            }
            Some(RunCommand::Unknown(message)) => {
                let _ = writeln!(writer, "  {}", style(message).yellow());
                continue;
            }
            Some(RunCommand::Start) => Turn::Start,
            Some(RunCommand::Cancel) => Turn::Cancel,
            Some(RunCommand::Recover(strategy)) => Turn::Recover(strategy),
            Some(RunCommand::Choose(token)) => Turn::Choice(token),
            None => match classify(&engine, key, &line).await {
                Ok(turn) => turn,
                Err(e) => {
                    let _ = writeln!(writer, "  {} {e}", style("error:").red().bold());
                    continue;
                }
            },
        };

        show(&mut writer, apply(&engine, key, &chain_id, turn).await, json);
    }

    cancel.cancel();
    sweeper.await.context("timeout sweeper panicked")?;
    let _ = rl.flush();
    println!("\n  {}", style("Session left as is; run again to resume.").dim());
    Ok(())
}

fn show(writer: &mut SharedWriter, outcome: Result<DialogOutcome, EngineError>, json: bool) {
    let _ = match outcome {
        Ok(outcome) => write!(writer, "{}", format_outcome(&outcome, json)),
        Err(e) => writeln!(writer, "  {} {e}", style("error:").red().bold()),
    };
}

async fn print_status<S: SessionStore>(writer: &mut SharedWriter, engine: &DialogEngine<S>, key: SessionKey) {
    let _ = match engine.session(key).await {
        Ok(Some(session)) => writeln!(
            writer,
            "  chain {} | step {} | {} | retries {} | data {}",
            style(&session.chain_id).cyan(),
            session.current_step_id,
            session.state,
            session.retry_count,
            serde_json::Value::Object(session.data)
        ),
        Ok(None) => writeln!(writer, "  {}", style("No stored session.").dim()),
        Err(e) => writeln!(writer, "  {} {e}", style("error:").red().bold()),
    };
}
