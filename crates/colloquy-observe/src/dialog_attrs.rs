//! Span attribute names for dialog instrumentation.
//!
//! Field names on the `dialog.turn` span opened by [`turn_span`] around each
//! event a gateway hands to the engine. Log lines inside the engine carry the
//! undotted equivalents (`chain_id`, `step_id`, ...).

/// Chain the session runs.
pub const DIALOG_CHAIN_ID: &str = "dialog.chain_id";

/// Step the session is on when the event arrives.
pub const DIALOG_STEP_ID: &str = "dialog.step_id";

/// Platform user id half of the session key.
pub const DIALOG_USER_ID: &str = "dialog.user_id";

/// Platform chat id half of the session key.
pub const DIALOG_CHAT_ID: &str = "dialog.chat_id";

/// Kind of event: `start`, `input`, `choice`, `recover`, `cancel`, `timeout`.
pub const DIALOG_EVENT: &str = "dialog.event";

/// Session state after the event was applied.
pub const DIALOG_STATE: &str = "dialog.state";

/// Span name for one dialog event.
pub const TURN_SPAN_NAME: &str = "dialog.turn";

/// Open a span for one event. `dialog.state` is recorded once the engine
/// has answered.
pub fn turn_span(event: &str, user_id: i64, chat_id: i64, chain_id: &str, step_id: &str) -> tracing::Span {
    tracing::info_span!(
        "dialog.turn",
        dialog.event = event,
        dialog.user_id = user_id,
        dialog.chat_id = chat_id,
        dialog.chain_id = chain_id,
        dialog.step_id = step_id,
        dialog.state = tracing::field::Empty,
    )
}
