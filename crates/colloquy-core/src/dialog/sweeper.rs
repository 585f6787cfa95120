//! Background timeout sweep.
//!
//! Calls [`DialogEngine::tick_timeouts`] on a fixed interval until the token
//! is cancelled. Replies for expired sessions go to `deliver`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::engine::{DialogEngine, DialogReply};
use super::store::SessionStore;

/// Spawn the sweep loop. The first tick fires after one full `interval`.
pub fn spawn_sweeper<S, F>(
    engine: Arc<DialogEngine<S>>,
    interval: Duration,
    cancel: CancellationToken,
    deliver: F,
) -> JoinHandle<()>
where
    S: SessionStore + 'static,
    F: Fn(Vec<DialogReply>) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("timeout sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match engine.tick_timeouts(Utc::now()).await {
                        Ok(replies) if replies.is_empty() => {}
                        Ok(replies) => {
                            tracing::info!(expired = replies.len(), "timeout sweep expired sessions");
                            deliver(replies);
                        }
                        Err(e) => tracing::warn!(error = %e, "timeout sweep failed"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::builder::{ChainBuilder, StepDecl};
    use crate::chain::registry::ChainRegistry;
    use crate::dialog::action::ActionRegistry;
    use crate::dialog::engine::{EngineSettings, EntryContext};
    use crate::dialog::store::InMemorySessionStore;
    use colloquy_types::chain::CHAIN_END;
    use colloquy_types::session::{SessionKey, SessionState};
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_sweeper_delivers_expired_sessions_and_stops() {
        let chain = ChainBuilder::new("quick")
            .start_with("ask")
            .timeout_secs(1)
            .step(StepDecl::question("ask", "Anything?").next(CHAIN_END))
            .build()
            .unwrap();
        let registry = Arc::new(ChainRegistry::new());
        registry.register(chain).unwrap();
        let engine = Arc::new(DialogEngine::new(
            Arc::new(InMemorySessionStore::new()),
            registry,
            ActionRegistry::new(),
            EngineSettings::default(),
        ));
        let key = SessionKey::new(5, 5);
        engine.start("quick", key, EntryContext::new()).await.unwrap();

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(
            Arc::clone(&engine),
            Duration::from_millis(100),
            cancel.clone(),
            move |replies| sink.lock().unwrap().extend(replies),
        );

        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
        handle.await.unwrap();

        let delivered = delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].key, key);
        assert_eq!(delivered[0].state, SessionState::Cancelled);
    }
}
