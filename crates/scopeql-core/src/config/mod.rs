//! Configuration types for scopeql.
//!
//! - **query**: the per-caller [`QueryConfig`] handed to the rewriter
//! - **functions**: the built-in function allowlist used when a configuration
//!   does not provide its own

pub mod functions;
pub mod query;

pub use functions::{default_allowed_functions, DEFAULT_ALLOWED_FUNCTIONS};
pub use query::{QueryConfig, SecurityFilter, DEFAULT_MAX_RESULT_ROWS};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
