//! Run Configuration Module
//!
//! Defines, loads and validates the immutable configuration of a run.
//!
//! # Structure
//!
//! - [`model`]: Configuration data structures
//! - [`loader`]: YAML loading
//! - [`validator`]: Validation rules

pub mod loader;
pub mod model;
pub mod validator;

pub use loader::{load_config, parse_config, read_config};
pub use model::{
    default_workers, ExecutionStrategy, MixWeights, OperationKind, RunConfiguration, RunMode,
    DEFAULT_TARGET, TARGET_PLACEHOLDER,
};
pub use validator::validate_config;
