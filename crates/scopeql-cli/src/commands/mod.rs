//! CLI command implementations.

pub mod check;
pub mod extract;
pub mod rewrite;

use std::path::Path;

use anyhow::{Context, Result};
use scopeql_core::QueryConfig;
use scopeql_rewriter::RewriteError;

/// Load and validate a query configuration file.
pub fn load_config(path: &Path) -> Result<QueryConfig> {
    let config = QueryConfig::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    tracing::debug!(
        path = %path.display(),
        workspace_id = %config.workspace_id,
        tables = config.allowed_tables.len(),
        "Loaded configuration"
    );
    Ok(config)
}

/// Turn a rejection into an error carrying the caller-facing message.
pub(crate) fn rejected(err: RewriteError) -> anyhow::Error {
    anyhow::anyhow!("{} [{}]", err.public_message(), err.code())
}
