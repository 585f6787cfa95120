//! Chain model: everything needed to turn declarations into an immutable,
//! validated `Chain`.
//!
//! - `validator` -- input predicates for Question steps
//! - `template` -- `{field}` placeholder substitution
//! - `expression` -- JEXL evaluator for branch conditions
//! - `transition` -- outgoing-transition rules and their resolution
//! - `model` -- the compiled `Chain` and `Step` types
//! - `builder` -- fluent builder with whole-chain static validation
//! - `registry` -- registered chains and their entry points
//! - `definition` -- YAML parsing and filesystem discovery

pub mod builder;
pub mod definition;
pub mod expression;
pub mod model;
pub mod registry;
pub mod template;
pub mod transition;
pub mod validator;

pub use builder::{ChainBuilder, ChainDefaults, ChainValidationError, ChainViolation, StepDecl};
pub use model::{Chain, Step, StepBody};
pub use registry::{ChainRegistry, RegistryError};
pub use transition::{ChainDesignError, Target, Transition};
pub use validator::Validator;
