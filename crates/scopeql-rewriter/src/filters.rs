//! Tenant and security filter injection.
//!
//! Every `SELECT` that reads a real table, wherever it sits in the statement,
//! gets one predicate per table ANDed into its `WHERE` clause:
//!
//! | Filter | Predicate |
//! |--------|-----------|
//! | workspace | `workspace_id = 'ws_1'` |
//! | security | `key_space_id IN ('ks_1', 'ks_2')` |
//! | security, no values | `1 = 0` |
//!
//! Predicates are always qualified by the table alias, or by the canonical
//! table name when there is none. An unqualified `workspace_id` would resolve
//! to a same-named alias in the `SELECT` list instead of the column.

use std::convert::Infallible;
use std::ops::ControlFlow;

use scopeql_core::QueryConfig;
use sqlparser::ast::{
    BinaryOperator, Expr, Ident, Query, Select, Statement, TableFactor, VisitMut, VisitorMut,
};

use crate::cte::{CteRegistry, CteScope, TableRef};
use crate::parser::body_selects_mut;
use crate::predicate::{and_predicate, binary, column_ref, number_literal, string_literal};

/// A restriction on one column, applied to every table read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnFilter {
    /// `column = 'value'`
    Equals { column: String, value: String },
    /// `column IN (...)`, or an always-false predicate when empty.
    OneOf { column: String, values: Vec<String> },
}

impl ColumnFilter {
    fn predicate(&self, qualifier: &[Ident]) -> Expr {
        match self {
            ColumnFilter::Equals { column, value } => binary(
                column_ref(qualifier, column),
                BinaryOperator::Eq,
                string_literal(value),
            ),
            ColumnFilter::OneOf { values, .. } if values.is_empty() => {
                binary(number_literal(1), BinaryOperator::Eq, number_literal(0))
            }
            ColumnFilter::OneOf { column, values } => Expr::InList {
                expr: Box::new(column_ref(qualifier, column)),
                list: values.iter().map(|value| string_literal(value)).collect(),
                negated: false,
            },
        }
    }
}

/// Injects column filters into every `SELECT` reading a real table.
pub struct FilterInjector<'a> {
    config: &'a QueryConfig,
    scope: CteScope<'a>,
    filters: Vec<ColumnFilter>,
    injected: Vec<String>,
}

impl<'a> FilterInjector<'a> {
    pub fn new(config: &'a QueryConfig, ctes: &'a CteRegistry, filters: Vec<ColumnFilter>) -> Self {
        Self {
            config,
            scope: CteScope::new(ctes),
            filters,
            injected: Vec::new(),
        }
    }

    /// Filter on the tenant column.
    pub fn workspace(config: &'a QueryConfig, ctes: &'a CteRegistry) -> Self {
        let filter = ColumnFilter::Equals {
            column: config.workspace_column.clone(),
            value: config.workspace_id.clone(),
        };
        Self::new(config, ctes, vec![filter])
    }

    /// Filters for the configured security scopes.
    pub fn security(config: &'a QueryConfig, ctes: &'a CteRegistry) -> Self {
        let filters = config
            .security_filters
            .iter()
            .map(|filter| ColumnFilter::OneOf {
                column: filter.column.clone(),
                values: filter.allowed_values.clone(),
            })
            .collect();
        Self::new(config, ctes, filters)
    }

    /// Inject the filters, returning the rendered predicates that were added.
    pub fn inject(mut self, statement: &mut Statement) -> Vec<String> {
        if self.filters.is_empty() {
            return Vec::new();
        }
        let _ = statement.visit(&mut self);
        self.injected
    }

    fn inject_select(&mut self, select: &mut Select) {
        let tables = self.scope.real_tables(select);
        if tables.is_empty() {
            return;
        }

        for qualifier in qualifiers(self.config, &tables) {
            for filter in &self.filters {
                let predicate = filter.predicate(&qualifier);
                let rendered = predicate.to_string();
                if and_predicate(&mut select.selection, predicate) {
                    tracing::debug!(predicate = %rendered, "Injected filter");
                    self.injected.push(rendered);
                }
            }
        }
    }
}

impl VisitorMut for FilterInjector<'_> {
    type Break = Infallible;

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        self.scope.enter(query);
        for select in body_selects_mut(&mut query.body) {
            self.inject_select(select);
        }
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &mut Query) -> ControlFlow<Self::Break> {
        self.scope.exit();
        ControlFlow::Continue(())
    }
}

/// Column qualifier for each real table: its alias, or the name the table
/// ends up with once canonicalised.
pub(crate) fn qualifiers(config: &QueryConfig, tables: &[TableRef]) -> Vec<Vec<Ident>> {
    tables
        .iter()
        .map(|table| match &table.alias {
            Some(alias) => vec![alias.clone()],
            None => match config.allowed_table(config.resolve_table(&table.name)) {
                Some(canonical) => canonical.split('.').map(Ident::new).collect(),
                None => table.parts.clone(),
            },
        })
        .collect()
}

/// Check whether a `SELECT` reads exactly one table and nothing else.
pub(crate) fn reads_single_table(select: &Select) -> bool {
    match select.from.as_slice() {
        [only] => only.joins.is_empty() && matches!(only.relation, TableFactor::Table { .. }),
        _ => false,
    }
}
