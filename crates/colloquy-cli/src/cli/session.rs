//! Session store commands: list, cancel, purge.

use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::{TimeDelta, Utc};
use colloquy_core::chain::registry::ChainRegistry;
use colloquy_core::dialog::{ActionRegistry, DialogOutcome, SessionStore};
use colloquy_types::session::{DialogSession, SessionKey, SessionState};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::json;

use crate::state::AppState;

use super::render::format_outcome;

/// List stored sessions, live ones only unless `all`.
pub async fn list_sessions(state: &AppState, all: bool, json: bool) -> Result<()> {
    let sessions = if all {
        state.store.list_all().await?
    } else {
        state.store.list_active().await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!();
        println!(
            "  {} No sessions stored under {}",
            style("i").blue().bold(),
            style(state.data_dir.display()).cyan()
        );
        println!();
        return Ok(());
    }

    println!();
    println!("{}", session_table(&sessions));
    println!();
    Ok(())
}

fn session_table(sessions: &[DialogSession]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("User").fg(Color::White),
        Cell::new("Chat").fg(Color::White),
        Cell::new("Chain").fg(Color::White),
        Cell::new("Step").fg(Color::White),
        Cell::new("State").fg(Color::White),
        Cell::new("Retries").fg(Color::White),
        Cell::new("Paused").fg(Color::White),
        Cell::new("Updated").fg(Color::White),
    ]);

    for session in sessions {
        let state_color = match session.state {
            SessionState::WaitingInput | SessionState::Active | SessionState::Created => Color::Green,
            SessionState::Error => Color::Red,
            SessionState::Completed => Color::Blue,
            SessionState::Cancelled => Color::DarkGrey,
        };
        let paused = session
            .suspended
            .as_deref()
            .map(|s| s.chain_id.clone())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(session.key.user_id),
            Cell::new(session.key.chat_id),
            Cell::new(&session.chain_id).fg(Color::Cyan),
            Cell::new(&session.current_step_id),
            Cell::new(session.state).fg(state_color),
            Cell::new(session.retry_count),
            Cell::new(paused),
            Cell::new(session.updated_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }
    table
}

/// Cancel the session for `key`.
///
/// Needs no chains: cancelling never executes a step.
pub async fn cancel_session(state: &AppState, key: SessionKey, json: bool) -> Result<()> {
    let engine = state.engine(Arc::new(ChainRegistry::new()), ActionRegistry::new());
    let outcome = engine.cancel(key).await?;

    if json {
        let status = match &outcome {
            DialogOutcome::Replied(reply) => reply.state.to_string(),
            DialogOutcome::Ignored { reason } => reason.clone(),
            DialogOutcome::NotHandled => "no session".to_string(),
        };
        println!("{}", json!({ "key": key.to_string(), "status": status }));
        return Ok(());
    }

    println!();
    print!("{}", format_outcome(&outcome, false));
    println!();
    Ok(())
}

/// Delete terminal sessions idle for at least `older_than_secs`
/// (default: the configured eviction grace).
pub async fn purge_sessions(state: &AppState, older_than_secs: Option<u64>, json: bool) -> Result<()> {
    let secs = older_than_secs.unwrap_or(state.config.eviction_grace_secs);
    let Some(cutoff) = i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|age| Utc::now().checked_sub_signed(age))
    else {
        bail!("--older-than-secs {secs} reaches past the earliest representable date");
    };
    let purged = state.store.purge_terminal(cutoff).await?;

    if json {
        println!("{}", json!({ "purged": purged, "cutoff": cutoff.to_rfc3339() }));
    } else {
        println!();
        println!(
            "  {} Purged {} finished session(s) idle since before {}",
            style("✓").green().bold(),
            purged,
            cutoff.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }
    Ok(())
}
