//! Table allowlist enforcement.

use std::collections::BTreeSet;
use std::ops::ControlFlow;

use scopeql_core::QueryConfig;
use sqlparser::ast::{ObjectName, Query, Statement, TableFactor, VisitMut, VisitorMut};

use crate::cte::{CteRegistry, CteScope};
use crate::error::RewriteError;
use crate::parser::{object_name, object_name_parts};

const SYSTEM_PREFIXES: &[&str] = &["system.", "information_schema."];

/// Checks every table reference against the allowlist and rewrites it to its
/// canonical `database.table` name.
pub struct TableAccessEnforcer<'a> {
    config: &'a QueryConfig,
    scope: CteScope<'a>,
    tables: BTreeSet<String>,
}

impl<'a> TableAccessEnforcer<'a> {
    pub fn new(config: &'a QueryConfig, ctes: &'a CteRegistry) -> Self {
        Self {
            config,
            scope: CteScope::new(ctes),
            tables: BTreeSet::new(),
        }
    }

    /// Enforce the allowlist over a statement.
    ///
    /// Returns the canonical names of the tables the statement reads.
    pub fn enforce(mut self, statement: &mut Statement) -> Result<BTreeSet<String>, RewriteError> {
        match statement.visit(&mut self) {
            ControlFlow::Break(err) => Err(err),
            ControlFlow::Continue(()) => Ok(self.tables),
        }
    }

    fn check_table(&mut self, name: &mut ObjectName) -> Result<(), RewriteError> {
        let Some(parts) = object_name_parts(name) else {
            return Err(not_allowed(name.to_string()));
        };
        if parts.len() == 1 && self.scope.contains(&parts[0]) {
            return Ok(());
        }

        let requested = parts.join(".");
        let resolved = self.config.resolve_table(&requested);

        if self.config.allowed_tables.is_empty() {
            return Err(not_allowed(resolved));
        }

        let lower = resolved.to_lowercase();
        if SYSTEM_PREFIXES.iter().any(|prefix| lower.starts_with(prefix)) {
            return Err(not_allowed(resolved));
        }

        let Some(canonical) = self.config.allowed_table(resolved) else {
            return Err(not_allowed(resolved));
        };
        let Some((database, table)) = canonical.split_once('.') else {
            return Err(not_allowed(resolved));
        };

        if requested != canonical {
            tracing::debug!(requested = %requested, canonical = %canonical, "Resolved table name");
        }
        *name = object_name(&[database, table]);
        self.tables.insert(canonical.to_string());
        Ok(())
    }
}

impl VisitorMut for TableAccessEnforcer<'_> {
    type Break = RewriteError;

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        self.scope.enter(query);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &mut Query) -> ControlFlow<Self::Break> {
        self.scope.exit();
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &mut TableFactor) -> ControlFlow<Self::Break> {
        let result = match table_factor {
            // Table functions such as numbers(), url() or remote().
            TableFactor::Table {
                name,
                args: Some(_),
                ..
            } => Err(not_allowed(name.to_string())),
            TableFactor::Table { name, .. } => self.check_table(name),
            TableFactor::Derived { .. } | TableFactor::NestedJoin { .. } => Ok(()),
            other => Err(not_allowed(other.to_string())),
        };

        match result {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => ControlFlow::Break(err),
        }
    }
}

fn not_allowed(table: impl Into<String>) -> RewriteError {
    RewriteError::TableNotAllowed {
        table: table.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::StatementParser;

    fn config() -> QueryConfig {
        QueryConfig::new("ws_1")
            .with_allowed_table("default.key_verifications_raw_v2")
            .with_allowed_table("default.ratelimits_raw_v2")
            .with_table_alias("key_verifications", "default.key_verifications_raw_v2")
    }

    fn enforce(config: &QueryConfig, sql: &str) -> Result<(String, BTreeSet<String>), RewriteError> {
        let mut statement = StatementParser::new().parse(sql)?;
        let ctes = CteRegistry::collect(&statement);
        let tables = TableAccessEnforcer::new(config, &ctes).enforce(&mut statement)?;
        Ok((statement.to_string(), tables))
    }

    #[test]
    fn test_alias_rewritten_to_canonical() {
        let (sql, tables) = enforce(&config(), "SELECT * FROM key_verifications").unwrap();
        assert_eq!(sql, "SELECT * FROM default.key_verifications_raw_v2");
        assert_eq!(
            tables.into_iter().collect::<Vec<_>>(),
            vec!["default.key_verifications_raw_v2"]
        );
    }

    #[test]
    fn test_alias_lookup_ignores_case() {
        let (sql, _) = enforce(&config(), "SELECT * FROM KEY_VERIFICATIONS AS kv").unwrap();
        assert_eq!(sql, "SELECT * FROM default.key_verifications_raw_v2 AS kv");
    }

    #[test]
    fn test_system_tables_rejected() {
        let err = enforce(&config(), "SELECT * FROM system.tables").unwrap_err();
        assert_eq!(
            err,
            RewriteError::TableNotAllowed {
                table: "system.tables".to_string()
            }
        );

        let err = enforce(&config(), "SELECT * FROM INFORMATION_SCHEMA.columns").unwrap_err();
        assert!(matches!(err, RewriteError::TableNotAllowed { .. }));
    }

    #[test]
    fn test_empty_allowlist_denies_everything() {
        let config = QueryConfig::new("ws_1");
        let err = enforce(&config, "SELECT * FROM default.key_verifications_raw_v2").unwrap_err();
        assert!(matches!(err, RewriteError::TableNotAllowed { .. }));
    }

    #[test]
    fn test_unknown_table_in_join_rejected() {
        let err = enforce(
            &config(),
            "SELECT * FROM default.ratelimits_raw_v2 r JOIN default.secrets s ON r.id = s.id",
        )
        .unwrap_err();
        assert_eq!(
            err,
            RewriteError::TableNotAllowed {
                table: "default.secrets".to_string()
            }
        );
    }

    #[test]
    fn test_table_in_subquery_checked() {
        let err = enforce(
            &config(),
            "SELECT * FROM default.ratelimits_raw_v2 WHERE id IN (SELECT id FROM default.secrets)",
        )
        .unwrap_err();
        assert!(matches!(err, RewriteError::TableNotAllowed { .. }));
    }

    #[test]
    fn test_table_function_rejected() {
        let err = enforce(&config(), "SELECT * FROM numbers(10)").unwrap_err();
        assert!(matches!(err, RewriteError::TableNotAllowed { .. }));
    }

    #[test]
    fn test_cte_names_allowed() {
        let (sql, tables) = enforce(
            &config(),
            "WITH recent AS (SELECT * FROM key_verifications) SELECT * FROM recent",
        )
        .unwrap();
        assert_eq!(
            sql,
            "WITH recent AS (SELECT * FROM default.key_verifications_raw_v2) SELECT * FROM recent"
        );
        assert_eq!(tables.len(), 1);
    }

    #[test]
    fn test_cte_self_reference_is_a_real_table() {
        let err = enforce(
            &config(),
            "WITH secrets AS (SELECT * FROM secrets) SELECT * FROM secrets",
        )
        .unwrap_err();
        assert_eq!(
            err,
            RewriteError::TableNotAllowed {
                table: "secrets".to_string()
            }
        );
    }
}
