//! The rewrite pipeline.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use scopeql_core::QueryConfig;
use sqlparser::ast::Statement;

use crate::cte::CteRegistry;
use crate::error::RewriteError;
use crate::extract::ColumnValueExtractor;
use crate::filters::FilterInjector;
use crate::functions::FunctionAllowlistValidator;
use crate::limit::ResultLimiter;
use crate::parser::StatementParser;
use crate::retention::RetentionValidator;
use crate::tables::TableAccessEnforcer;

/// Rewrites one customer query into a tenant-scoped one.
///
/// A `Rewriter` holds the state of a single query. Construct one per query.
pub struct Rewriter<'a> {
    config: &'a QueryConfig,
    now: DateTime<Utc>,
    statement: Option<Statement>,
    tables: BTreeSet<String>,
    predicates: Vec<String>,
}

struct Rewritten {
    statement: Statement,
    tables: BTreeSet<String>,
    predicates: Vec<String>,
}

impl<'a> Rewriter<'a> {
    pub fn new(config: &'a QueryConfig) -> Self {
        Self::with_now(config, Utc::now())
    }

    /// Create a rewriter that evaluates `now()` as the given instant.
    pub fn with_now(config: &'a QueryConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            now,
            statement: None,
            tables: BTreeSet::new(),
            predicates: Vec::new(),
        }
    }

    /// Rewrite a query, returning the SQL to execute.
    pub fn rewrite(&mut self, sql: &str) -> Result<String, RewriteError> {
        self.statement = None;
        self.tables.clear();
        self.predicates.clear();

        let span = tracing::info_span!("rewrite", workspace_id = %self.config.workspace_id);
        let _guard = span.enter();

        match self.run(sql) {
            Ok(rewritten) => {
                let rendered = render(&rewritten.statement);
                tracing::info!(
                    tables = ?rewritten.tables,
                    predicates = ?rewritten.predicates,
                    "Rewrote query"
                );
                self.statement = Some(rewritten.statement);
                self.tables = rewritten.tables;
                self.predicates = rewritten.predicates;
                Ok(rendered)
            }
            Err(err) => {
                tracing::warn!(code = err.code(), error = %err, "Rejected query");
                Err(err)
            }
        }
    }

    fn run(&self, sql: &str) -> Result<Rewritten, RewriteError> {
        let mut statement = StatementParser::new().parse(sql)?;
        let ctes = CteRegistry::collect(&statement);
        tracing::debug!(ctes = ctes.len(), "Parsed statement");

        let mut predicates = FilterInjector::security(self.config, &ctes).inject(&mut statement);

        let tables = TableAccessEnforcer::new(self.config, &ctes).enforce(&mut statement)?;
        tracing::debug!(tables = ?tables, "Table access granted");

        predicates.extend(FilterInjector::workspace(self.config, &ctes).inject(&mut statement));

        let limit = ResultLimiter::new(self.config.max_result_rows).apply(&mut statement);
        tracing::debug!(limit, "Row limit set");

        FunctionAllowlistValidator::new(self.config).validate(&statement)?;

        predicates.extend(RetentionValidator::new(self.config, &ctes, self.now).validate(&mut statement)?);

        Ok(Rewritten {
            statement,
            tables,
            predicates,
        })
    }

    /// Values the last successful rewrite scopes a column to.
    ///
    /// Empty before a successful [`Rewriter::rewrite`].
    pub fn extract_column(&self, column: &str) -> BTreeSet<String> {
        match &self.statement {
            Some(statement) => ColumnValueExtractor::new(column).extract(statement),
            None => BTreeSet::new(),
        }
    }

    /// Canonical names of the tables the last rewritten query reads.
    pub fn tables(&self) -> Vec<String> {
        self.tables.iter().cloned().collect()
    }

    /// Predicates injected by the last rewrite.
    pub fn predicates(&self) -> &[String] {
        &self.predicates
    }
}

/// Render a statement back to SQL.
pub fn render(statement: &Statement) -> String {
    statement.to_string()
}
