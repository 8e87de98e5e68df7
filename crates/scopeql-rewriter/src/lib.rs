//! # scopeql-rewriter
//!
//! Tenant-safe rewriting of customer analytics SQL.
//!
//! Customers send arbitrary ClickHouse SQL. The rewriter parses it, rejects
//! anything that is not a plain read of allowed tables, and returns a query
//! that is scoped to the caller's workspace, bounded in time and capped in
//! rows.
//!
//! **Before (from customer):**
//! ```sql
//! SELECT count(*) FROM key_verifications WHERE key_space_id = 'ks_1234'
//! ```
//!
//! **After (to ClickHouse):**
//! ```sql
//! SELECT count(*) FROM default.key_verifications_raw_v2
//! WHERE key_space_id = 'ks_1234'
//!   AND default.key_verifications_raw_v2.workspace_id = 'ws_1'
//!   AND default.key_verifications_raw_v2.time >= now() - INTERVAL 30 DAY
//! LIMIT 10000
//! ```
//!
//! ## Pipeline
//!
//! | Stage | Effect |
//! |-------|--------|
//! | [`StatementParser`] | One `SELECT` only; no `SETTINGS`, `FORMAT`, `FETCH`, `LIMIT BY` or `ARRAY JOIN` |
//! | [`CteRegistry`] | CTE names are not checked against the allowlist |
//! | [`FilterInjector::security`] | `column IN (...)` per configured security filter |
//! | [`TableAccessEnforcer`] | Allowlist, aliases, no system tables or table functions |
//! | [`FilterInjector::workspace`] | `workspace_id = '...'` on every table read |
//! | [`ResultLimiter`] | Caps `LIMIT` on the outermost query |
//! | [`FunctionAllowlistValidator`] | Every function call is allowlisted |
//! | [`RetentionValidator`] | Lower time bounds stay within the retention window |
//!
//! The first failing stage aborts the rewrite with a [`RewriteError`].

pub mod cte;
pub mod error;
pub mod extract;
pub mod filters;
pub mod functions;
pub mod limit;
pub mod parser;
mod predicate;
pub mod retention;
pub mod rewriter;
pub mod tables;

pub use cte::{CteRegistry, CteScope};
pub use error::RewriteError;
pub use extract::ColumnValueExtractor;
pub use filters::{ColumnFilter, FilterInjector};
pub use functions::FunctionAllowlistValidator;
pub use limit::ResultLimiter;
pub use parser::StatementParser;
pub use retention::{RetentionValidator, TimestampEvaluator};
pub use rewriter::{Rewriter, render};
pub use tables::TableAccessEnforcer;

use scopeql_core::QueryConfig;

/// Rewrite a single query with the given configuration.
pub fn rewrite(sql: &str, config: &QueryConfig) -> Result<String, RewriteError> {
    Rewriter::new(config).rewrite(sql)
}
