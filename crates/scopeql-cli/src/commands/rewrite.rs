//! `scopeql rewrite` command implementation.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use scopeql_core::QueryConfig;
use scopeql_rewriter::Rewriter;

use super::rejected;

/// JSON output of `scopeql rewrite --json`.
#[derive(Debug, Serialize)]
pub struct RewriteReport {
    pub sql: String,
    pub workspace_id: String,
    pub tables: Vec<String>,
    pub predicates: Vec<String>,
}

/// Rewrite a query, returning plain SQL or a JSON report.
pub fn run(config: &QueryConfig, sql: &str, now: Option<DateTime<Utc>>, json: bool) -> Result<String> {
    let mut rewriter = match now {
        Some(now) => Rewriter::with_now(config, now),
        None => Rewriter::new(config),
    };
    let rewritten = rewriter.rewrite(sql).map_err(rejected)?;

    if !json {
        return Ok(rewritten);
    }

    let report = RewriteReport {
        sql: rewritten,
        workspace_id: config.workspace_id.clone(),
        tables: rewriter.tables(),
        predicates: rewriter.predicates().to_vec(),
    };
    Ok(serde_json::to_string_pretty(&report)?)
}
