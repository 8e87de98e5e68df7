//! `scopeql extract` command implementation.

use std::collections::BTreeSet;

use anyhow::Result;
use scopeql_core::QueryConfig;
use scopeql_rewriter::Rewriter;

use super::rejected;

/// Rewrite a query and return the values it scopes `column` to.
///
/// The query must pass the rewrite; values are read from the rewritten form.
pub fn run(config: &QueryConfig, sql: &str, column: &str) -> Result<BTreeSet<String>> {
    let mut rewriter = Rewriter::new(config);
    rewriter.rewrite(sql).map_err(rejected)?;
    Ok(rewriter.extract_column(column))
}
