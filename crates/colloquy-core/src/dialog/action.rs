//! Action-step boundary.
//!
//! An Action step names an operation; the embedding application registers a
//! handler for it. The engine calls the handler with a snapshot of the
//! session data and merges the returned JSON into `data[step_id]`.
//!
//! Handlers use RPITIT like the rest of the crate. `ActionHandlerDyn` is the
//! object-safe twin (boxed futures, blanket impl) that lets the registry hold
//! heterogeneous handlers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use colloquy_types::session::{SessionData, SessionKey};
use serde_json::Value;
use thiserror::Error;

/// Everything a handler gets to see about the invocation.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub key: SessionKey,
    pub chain_id: String,
    pub step_id: String,
    pub operation: String,
    /// Snapshot of the session data at invocation time.
    pub data: SessionData,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("action failed: {0}")]
    Failed(String),

    #[error("action timed out after {0:?}")]
    Timeout(Duration),

    #[error("no handler registered for operation '{0}'")]
    UnknownOperation(String),
}

/// An external operation invoked by Action steps.
pub trait ActionHandler: Send + Sync {
    fn execute(
        &self,
        ctx: ActionContext,
    ) -> impl Future<Output = Result<Value, ActionError>> + Send;
}

/// Object-safe version of [`ActionHandler`] with boxed futures.
pub trait ActionHandlerDyn: Send + Sync {
    fn execute_boxed(
        &self,
        ctx: ActionContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActionError>> + Send + '_>>;
}

impl<T: ActionHandler> ActionHandlerDyn for T {
    fn execute_boxed(
        &self,
        ctx: ActionContext,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActionError>> + Send + '_>> {
        Box::pin(self.execute(ctx))
    }
}

/// Adapter turning an async closure into a handler.
pub struct FnAction<F>(pub F);

impl<F, Fut> ActionHandler for FnAction<F>
where
    F: Fn(ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActionError>> + Send,
{
    fn execute(
        &self,
        ctx: ActionContext,
    ) -> impl Future<Output = Result<Value, ActionError>> + Send {
        (self.0)(ctx)
    }
}

/// Operation name -> handler.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandlerDyn>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: ActionHandler + 'static>(&mut self, operation: impl Into<String>, handler: H) {
        self.handlers.insert(operation.into(), Arc::new(handler));
    }

    pub fn register_fn<F, Fut>(&mut self, operation: impl Into<String>, f: F)
    where
        F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        self.register(operation, FnAction(f));
    }

    pub fn get(&self, operation: &str) -> Option<Arc<dyn ActionHandlerDyn>> {
        self.handlers.get(operation).cloned()
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.handlers.contains_key(operation)
    }

    /// Registered operation names, sorted.
    pub fn operations(&self) -> Vec<&str> {
        let mut ops: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ops.sort_unstable();
        ops
    }

    /// Run `ctx.operation` bounded by `timeout`.
    pub async fn invoke(&self, ctx: ActionContext, timeout: Duration) -> Result<Value, ActionError> {
        let handler = self
            .get(&ctx.operation)
            .ok_or_else(|| ActionError::UnknownOperation(ctx.operation.clone()))?;
        match tokio::time::timeout(timeout, handler.execute_boxed(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ActionError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl ActionHandler for Echo {
        async fn execute(&self, ctx: ActionContext) -> Result<Value, ActionError> {
            Ok(json!({ "step": ctx.step_id, "fields": ctx.data.len() }))
        }
    }

    fn ctx(operation: &str) -> ActionContext {
        ActionContext {
            key: SessionKey::new(1, 1),
            chain_id: "c".into(),
            step_id: "save".into(),
            operation: operation.into(),
            data: SessionData::new(),
        }
    }

    #[tokio::test]
    async fn test_invoke_registered_handler() {
        let mut registry = ActionRegistry::new();
        registry.register("echo", Echo);
        let out = registry.invoke(ctx("echo"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(out, json!({"step": "save", "fields": 0}));
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let registry = ActionRegistry::new();
        let err = registry.invoke(ctx("nope"), Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, ActionError::UnknownOperation("nope".into()));
    }

    #[tokio::test]
    async fn test_closure_handler_and_timeout() {
        let mut registry = ActionRegistry::new();
        registry.register_fn("slow", |_ctx| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        });
        registry.register_fn("fail", |_ctx| async { Err(ActionError::Failed("down".into())) });

        let err = registry.invoke(ctx("slow"), Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, ActionError::Timeout(_)));

        let err = registry.invoke(ctx("fail"), Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.to_string(), "action failed: down");
        assert_eq!(registry.operations(), vec!["fail", "slow"]);
    }
}
