//! Registry of validated chains and the entry-point commands that start them.
//!
//! Only built chains can be registered, so design-time errors abort
//! registration before any session can reference the chain. A chain that
//! later hits a runtime `ChainDesignError` is disabled here: existing sessions
//! can still be cancelled, but no new session can start.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use super::model::Chain;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("chain '{0}' is not registered")]
    ChainNotRegistered(String),

    #[error("chain '{0}' is disabled")]
    ChainDisabled(String),

    #[error("chain '{0}' is already registered")]
    DuplicateChain(String),

    #[error("entry point '{entry_point}' is already bound to chain '{chain_id}'")]
    EntryPointConflict {
        entry_point: String,
        chain_id: String,
    },
}

struct Registered {
    chain: Arc<Chain>,
    enabled: bool,
}

/// Summary row for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSummary {
    pub id: String,
    pub name: String,
    pub steps: usize,
    pub entry_points: Vec<String>,
    pub enabled: bool,
}

/// Thread-safe chain registry.
#[derive(Default)]
pub struct ChainRegistry {
    chains: DashMap<String, Registered>,
    entry_points: DashMap<String, String>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chain and bind its entry points.
    pub fn register(&self, chain: Chain) -> Result<Arc<Chain>, RegistryError> {
        if self.chains.contains_key(chain.id()) {
            return Err(RegistryError::DuplicateChain(chain.id().to_string()));
        }
        for ep in chain.entry_points() {
            if let Some(owner) = self.entry_points.get(ep) {
                return Err(RegistryError::EntryPointConflict {
                    entry_point: ep.clone(),
                    chain_id: owner.value().clone(),
                });
            }
        }

        let chain = Arc::new(chain);
        for ep in chain.entry_points() {
            self.entry_points.insert(ep.clone(), chain.id().to_string());
        }
        self.chains.insert(
            chain.id().to_string(),
            Registered {
                chain: Arc::clone(&chain),
                enabled: true,
            },
        );
        tracing::info!(chain_id = %chain.id(), "chain registered");
        Ok(chain)
    }

    /// Remove a chain and its entry points. Returns whether it existed.
    pub fn unregister(&self, chain_id: &str) -> bool {
        self.entry_points.retain(|_, owner| owner != chain_id);
        self.chains.remove(chain_id).is_some()
    }

    /// Look up an enabled chain for starting a new session.
    pub fn get(&self, chain_id: &str) -> Result<Arc<Chain>, RegistryError> {
        let entry = self
            .chains
            .get(chain_id)
            .ok_or_else(|| RegistryError::ChainNotRegistered(chain_id.to_string()))?;
        if !entry.enabled {
            return Err(RegistryError::ChainDisabled(chain_id.to_string()));
        }
        Ok(Arc::clone(&entry.chain))
    }

    /// Look up a chain regardless of its enabled flag (for live sessions).
    pub fn lookup(&self, chain_id: &str) -> Option<Arc<Chain>> {
        self.chains.get(chain_id).map(|e| Arc::clone(&e.chain))
    }

    /// Chain id bound to an entry-point command.
    pub fn resolve_entry_point(&self, command: &str) -> Option<String> {
        self.entry_points.get(command.trim()).map(|e| e.value().clone())
    }

    pub fn is_enabled(&self, chain_id: &str) -> bool {
        self.chains.get(chain_id).is_some_and(|e| e.enabled)
    }

    pub fn enable(&self, chain_id: &str) -> Result<(), RegistryError> {
        self.set_enabled(chain_id, true)
    }

    pub fn disable(&self, chain_id: &str) -> Result<(), RegistryError> {
        self.set_enabled(chain_id, false)
    }

    fn set_enabled(&self, chain_id: &str, enabled: bool) -> Result<(), RegistryError> {
        let mut entry = self
            .chains
            .get_mut(chain_id)
            .ok_or_else(|| RegistryError::ChainNotRegistered(chain_id.to_string()))?;
        entry.enabled = enabled;
        tracing::info!(chain_id, enabled, "chain availability changed");
        Ok(())
    }

    /// All registered chains, sorted by id.
    pub fn list(&self) -> Vec<ChainSummary> {
        let mut out: Vec<ChainSummary> = self
            .chains
            .iter()
            .map(|e| ChainSummary {
                id: e.chain.id().to_string(),
                name: e.chain.name().to_string(),
                steps: e.chain.len(),
                entry_points: e.chain.entry_points().to_vec(),
                enabled: e.enabled,
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::builder::{ChainBuilder, StepDecl};

    fn chain(id: &str, entry: &str) -> Chain {
        ChainBuilder::new(id)
            .start_with("done")
            .entry_point(entry)
            .step(StepDecl::final_step("done", "bye"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_and_get() {
        let registry = ChainRegistry::new();
        registry.register(chain("a", "/a")).unwrap();
        assert_eq!(registry.get("a").unwrap().id(), "a");
        assert_eq!(registry.resolve_entry_point("/a").as_deref(), Some("a"));
        assert_eq!(
            registry.get("zzz").unwrap_err(),
            RegistryError::ChainNotRegistered("zzz".into())
        );
    }

    #[test]
    fn test_duplicate_and_entry_conflicts() {
        let registry = ChainRegistry::new();
        registry.register(chain("a", "/a")).unwrap();
        assert_eq!(
            registry.register(chain("a", "/other")).unwrap_err(),
            RegistryError::DuplicateChain("a".into())
        );
        assert!(matches!(
            registry.register(chain("b", "/a")).unwrap_err(),
            RegistryError::EntryPointConflict { .. }
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_disabled_chain_cannot_start_but_is_still_visible() {
        let registry = ChainRegistry::new();
        registry.register(chain("a", "/a")).unwrap();
        registry.disable("a").unwrap();
        assert_eq!(registry.get("a").unwrap_err(), RegistryError::ChainDisabled("a".into()));
        assert!(registry.lookup("a").is_some());
        assert!(!registry.list()[0].enabled);

        registry.enable("a").unwrap();
        assert!(registry.get("a").is_ok());
    }

    #[test]
    fn test_unregister_removes_entry_points() {
        let registry = ChainRegistry::new();
        registry.register(chain("a", "/a")).unwrap();
        assert!(registry.unregister("a"));
        assert!(registry.resolve_entry_point("/a").is_none());
        assert!(registry.is_empty());
    }
}
