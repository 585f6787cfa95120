//! Chain definition parsing and filesystem operations.
//!
//! Converts between YAML files and `ChainDefinition`, and compiles
//! definitions through the builder so a loaded chain is always validated.

use std::path::{Path, PathBuf};

use colloquy_types::chain::ChainDefinition;
use thiserror::Error;

use super::builder::{ChainBuilder, ChainDefaults, ChainValidationError};
use super::model::Chain;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML parse or serialization failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// The definition parsed but does not form a valid chain.
    #[error(transparent)]
    Invalid(#[from] ChainValidationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a definition without validating it.
pub fn parse_definition_yaml(yaml: &str) -> Result<ChainDefinition, DefinitionError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))
}

pub fn serialize_definition_yaml(def: &ChainDefinition) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(def).map_err(|e| DefinitionError::Parse(e.to_string()))
}

/// Compile a definition into a validated chain.
pub fn compile_definition(
    def: &ChainDefinition,
    defaults: ChainDefaults,
) -> Result<Chain, DefinitionError> {
    Ok(ChainBuilder::from_definition(def).defaults(defaults).build()?)
}

/// Parse and validate a chain from YAML.
pub fn parse_chain_yaml(yaml: &str, defaults: ChainDefaults) -> Result<Chain, DefinitionError> {
    compile_definition(&parse_definition_yaml(yaml)?, defaults)
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

pub fn load_definition_file(path: &Path) -> Result<ChainDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    parse_definition_yaml(&content)
}

/// Load and validate a chain from a YAML file.
pub fn load_chain_file(path: &Path, defaults: ChainDefaults) -> Result<Chain, DefinitionError> {
    compile_definition(&load_definition_file(path)?, defaults)
}

/// Save a definition to a YAML file, creating parent directories.
pub fn save_chain_file(path: &Path, def: &ChainDefinition) -> Result<(), DefinitionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_definition_yaml(def)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover all valid chain files (`.yaml`/`.yml`) under `base_dir`, recursively.
///
/// Files that fail to parse or validate are skipped with a warning.
pub fn discover_chains(
    base_dir: &Path,
    defaults: ChainDefaults,
) -> Result<Vec<(PathBuf, Chain)>, DefinitionError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, defaults, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    defaults: ChainDefaults,
    results: &mut Vec<(PathBuf, Chain)>,
) -> Result<(), DefinitionError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, defaults, results)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            match load_chain_file(&path, defaults) {
                Ok(chain) => results.push((path, chain)),
                Err(e) => {
                    tracing::warn!(?path, error = %e, "skipping invalid chain file");
                }
            }
        }
    }
    Ok(())
}
