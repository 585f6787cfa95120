//! Demo action handlers backing the bundled chains.

use colloquy_core::dialog::{ActionContext, ActionError, ActionRegistry};
use serde_json::{Value, json};

/// Handlers for the operations referenced under `chains/`.
pub fn demo_actions() -> ActionRegistry {
    let mut actions = ActionRegistry::new();
    actions.register_fn("register_user", |ctx: ActionContext| async move { register_user(&ctx) });
    actions
}

/// Derives a stable member id from the session key and the captured name.
fn register_user(ctx: &ActionContext) -> Result<Value, ActionError> {
    let name = ctx
        .data
        .get("ask_name")
        .and_then(Value::as_str)
        .ok_or_else(|| ActionError::Failed("no name captured".to_string()))?;
    let member_id = format!(
        "M-{:04}-{:04}",
        ctx.key.user_id.rem_euclid(10_000),
        ctx.key.chat_id.rem_euclid(10_000)
    );
    tracing::info!(
        chain_id = %ctx.chain_id,
        step_id = %ctx.step_id,
        user_id = ctx.key.user_id,
        chat_id = ctx.key.chat_id,
        %member_id,
        "registered demo user"
    );
    Ok(json!({ "member_id": member_id, "name": name }))
}
