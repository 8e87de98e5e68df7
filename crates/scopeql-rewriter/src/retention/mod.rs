//! Retention window enforcement.
//!
//! Every `SELECT` is checked for lower bounds on the time column. A bound
//! that reaches further back than the configured window rejects the query.
//! A `SELECT` that reads a real table without an effective lower bound gets
//! `time >= now() - INTERVAL N DAY` added to its `WHERE` clause.
//!
//! A bound is *effective* only when the `WHERE` clause cannot be true without
//! it, i.e. it is reachable from the root through `AND` and parentheses. A
//! bound under `OR` is still checked against the window but does not count.
//! Effective bounds are tracked per table, so every table of a join that has
//! no bound of its own gets one.

pub mod eval;

use std::ops::ControlFlow;

use chrono::{DateTime, TimeDelta, Utc};
use scopeql_core::QueryConfig;
use sqlparser::ast::{
    BinaryOperator, Expr, Query, Select, SelectItem, Statement, VisitMut, VisitorMut,
};

use crate::cte::{CteRegistry, CteScope, TableRef};
use crate::error::RewriteError;
use crate::filters::{qualifiers, reads_single_table};
use crate::parser::{StatementParser, body_selects_mut};
use crate::predicate::{and_predicate, binary, column_ref};

pub use eval::TimestampEvaluator;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Checks and enforces the retention window of a statement.
pub struct RetentionValidator<'a> {
    config: &'a QueryConfig,
    scope: CteScope<'a>,
    evaluator: TimestampEvaluator,
    earliest: DateTime<Utc>,
    lower_bound: Option<Expr>,
    injected: Vec<String>,
}

impl<'a> RetentionValidator<'a> {
    pub fn new(config: &'a QueryConfig, ctes: &'a CteRegistry, now: DateTime<Utc>) -> Self {
        let earliest = TimeDelta::try_days(config.max_query_range_days)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Self {
            config,
            scope: CteScope::new(ctes),
            evaluator: TimestampEvaluator::new(now),
            earliest,
            lower_bound: None,
            injected: Vec::new(),
        }
    }

    /// Earliest instant a query may reach.
    pub fn earliest(&self) -> DateTime<Utc> {
        self.earliest
    }

    /// Validate the statement's time bounds, injecting one where missing.
    ///
    /// Returns the rendered predicates that were added.
    pub fn validate(mut self, statement: &mut Statement) -> Result<Vec<String>, RewriteError> {
        if self.config.max_query_range_days <= 0 {
            return Ok(Vec::new());
        }

        self.lower_bound = Some(StatementParser::new().parse_expr(&format!(
            "now() - INTERVAL {} DAY",
            self.config.max_query_range_days
        ))?);

        match statement.visit(&mut self) {
            ControlFlow::Break(err) => Err(err),
            ControlFlow::Continue(()) => Ok(self.injected),
        }
    }

    fn check_select(&mut self, select: &mut Select) -> Result<(), RewriteError> {
        let mut established = Vec::new();
        if let Some(selection) = &select.selection {
            self.check_clause(selection, true, &mut established)?;
        }
        if let Some(having) = &select.having {
            self.check_clause(having, false, &mut established)?;
        }

        let tables = self.scope.real_tables(select);
        if tables.is_empty() {
            return Ok(());
        }
        let Some(lower_bound) = &self.lower_bound else {
            return Ok(());
        };

        // An unqualified bound names the table only when it is the sole
        // source and no `SELECT`-list alias takes the column's name.
        let unqualified_counts = reads_single_table(select)
            && !projects_alias(select, &self.config.time_column);

        for (table, qualifier) in tables.iter().zip(qualifiers(self.config, &tables)) {
            let bounded = established.iter().any(|bound| match bound.as_slice() {
                [] => unqualified_counts,
                bound => names_table(self.config, table, bound),
            });
            if bounded {
                continue;
            }

            let predicate = binary(
                column_ref(&qualifier, &self.config.time_column),
                BinaryOperator::GtEq,
                lower_bound.clone(),
            );
            let rendered = predicate.to_string();
            if and_predicate(&mut select.selection, predicate) {
                tracing::debug!(predicate = %rendered, "Injected retention bound");
                self.injected.push(rendered);
            }
        }
        Ok(())
    }

    /// Walk a `WHERE`/`HAVING` clause, validating every lower time bound.
    ///
    /// `conjunctive` is true while the path from the clause root only went
    /// through `AND` and parentheses. The qualifier of every bound found on
    /// such a path is pushed to `established` (empty when unqualified).
    fn check_clause(
        &self,
        expr: &Expr,
        conjunctive: bool,
        established: &mut Vec<Vec<String>>,
    ) -> Result<(), RewriteError> {
        match expr {
            Expr::BinaryOp { left, op, right } => {
                if let Some((qualifier, op, value)) = self.time_comparison(left, op, right) {
                    if matches!(
                        op,
                        BinaryOperator::GtEq | BinaryOperator::Gt | BinaryOperator::Eq
                    ) {
                        self.check_bound(value)?;
                        if conjunctive {
                            established.push(qualifier);
                        }
                    }
                    return Ok(());
                }

                let conjunctive = conjunctive && *op == BinaryOperator::And;
                self.check_clause(left, conjunctive, established)?;
                self.check_clause(right, conjunctive, established)
            }
            Expr::Nested(inner) => self.check_clause(inner, conjunctive, established),
            Expr::Between {
                expr,
                negated: false,
                low,
                ..
            } => {
                let Some(qualifier) = self.time_qualifier(expr) else {
                    return Ok(());
                };
                self.check_bound(low)?;
                if conjunctive {
                    established.push(qualifier);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Normalise a comparison to `time <op> value`, if one side is the time column.
    fn time_comparison<'e>(
        &self,
        left: &'e Expr,
        op: &BinaryOperator,
        right: &'e Expr,
    ) -> Option<(Vec<String>, BinaryOperator, &'e Expr)> {
        if let Some(qualifier) = self.time_qualifier(left) {
            return Some((qualifier, op.clone(), right));
        }
        if let Some(qualifier) = self.time_qualifier(right) {
            let flipped = match op {
                BinaryOperator::Gt => BinaryOperator::Lt,
                BinaryOperator::Lt => BinaryOperator::Gt,
                BinaryOperator::GtEq => BinaryOperator::LtEq,
                BinaryOperator::LtEq => BinaryOperator::GtEq,
                other => other.clone(),
            };
            return Some((qualifier, flipped, left));
        }
        None
    }

    /// Lowercased qualifier of a reference to the time column.
    fn time_qualifier(&self, expr: &Expr) -> Option<Vec<String>> {
        let (qualifier, column) = match expr {
            Expr::Identifier(ident) => (&[][..], ident),
            Expr::CompoundIdentifier(idents) => {
                let (column, qualifier) = idents.split_last()?;
                (qualifier, column)
            }
            _ => return None,
        };
        column
            .value
            .eq_ignore_ascii_case(&self.config.time_column)
            .then(|| {
                qualifier
                    .iter()
                    .map(|ident| ident.value.to_lowercase())
                    .collect()
            })
    }

    fn check_bound(&self, value: &Expr) -> Result<(), RewriteError> {
        let requested = match self.evaluator.evaluate(value) {
            Some(requested) => requested,
            None if self.config.strict_time_bounds => {
                tracing::warn!(expression = %value, "Rejected unevaluable time bound");
                return Err(RewriteError::UnsupportedTimeExpression {
                    expression: value.to_string(),
                });
            }
            None => {
                tracing::warn!(
                    expression = %value,
                    "Cannot evaluate time bound, treating it as now"
                );
                self.evaluator.now()
            }
        };

        if requested < self.earliest {
            return Err(RewriteError::RetentionExceeded {
                requested_date: requested.format(DATE_FORMAT).to_string(),
                earliest_allowed_date: self.earliest.format(DATE_FORMAT).to_string(),
            });
        }
        Ok(())
    }
}

/// Check whether a bound's qualifier refers to `table`: its alias, its name
/// as written, its canonical name, or the bare table name.
fn names_table(config: &QueryConfig, table: &TableRef, qualifier: &[String]) -> bool {
    let equals = |parts: &[&str]| {
        parts.len() == qualifier.len()
            && parts
                .iter()
                .zip(qualifier)
                .all(|(part, bound)| part.eq_ignore_ascii_case(bound))
    };

    if let Some(alias) = &table.alias {
        return equals(&[alias.value.as_str()]);
    }

    let written: Vec<&str> = table.parts.iter().map(|part| part.value.as_str()).collect();
    let canonical = config
        .allowed_table(config.resolve_table(&table.name))
        .map(|canonical| canonical.split('.').collect::<Vec<_>>())
        .unwrap_or_default();
    [written, canonical]
        .iter()
        .filter(|parts| !parts.is_empty())
        .any(|parts| equals(parts) || parts.last().is_some_and(|name| equals(&[*name])))
}

/// Check whether the `SELECT` list defines an alias called `column`.
fn projects_alias(select: &Select, column: &str) -> bool {
    select.projection.iter().any(|item| match item {
        SelectItem::ExprWithAlias { alias, .. } => alias.value.eq_ignore_ascii_case(column),
        _ => false,
    })
}

impl VisitorMut for RetentionValidator<'_> {
    type Break = RewriteError;

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        self.scope.enter(query);
        for select in body_selects_mut(&mut query.body) {
            if let Err(err) = self.check_select(select) {
                return ControlFlow::Break(err);
            }
        }
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &mut Query) -> ControlFlow<Self::Break> {
        self.scope.exit();
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::eval::parse_timestamp;

    fn now() -> DateTime<Utc> {
        parse_timestamp("2024-06-30T12:00:00Z").unwrap()
    }

    fn config() -> QueryConfig {
        QueryConfig::new("ws_1").with_max_query_range_days(30)
    }

    fn validate(config: &QueryConfig, sql: &str) -> Result<String, RewriteError> {
        let mut statement = StatementParser::new().parse(sql)?;
        let ctes = CteRegistry::collect(&statement);
        RetentionValidator::new(config, &ctes, now()).validate(&mut statement)?;
        Ok(statement.to_string())
    }

    #[test]
    fn test_earliest() {
        let config = config();
        let ctes = CteRegistry::default();
        let validator = RetentionValidator::new(&config, &ctes, now());
        assert_eq!(validator.earliest(), parse_timestamp("2024-05-31T12:00:00Z").unwrap());
    }

    #[test]
    fn test_bound_within_window_kept() {
        let sql = "SELECT * FROM default.a WHERE time >= now() - INTERVAL 30 DAY";
        assert_eq!(validate(&config(), sql).unwrap(), sql);
    }

    #[test]
    fn test_bound_beyond_window_rejected() {
        let err = validate(
            &config(),
            "SELECT * FROM default.a WHERE time >= now() - INTERVAL 31 DAY",
        )
        .unwrap_err();
        assert_eq!(
            err,
            RewriteError::RetentionExceeded {
                requested_date: "2024-05-30".to_string(),
                earliest_allowed_date: "2024-05-31".to_string(),
            }
        );
    }

    #[test]
    fn test_reversed_comparison_normalised() {
        let err = validate(&config(), "SELECT * FROM default.a WHERE '2024-01-01' <= time")
            .unwrap_err();
        assert!(matches!(err, RewriteError::RetentionExceeded { .. }));

        // An upper bound alone does not satisfy the window.
        let sql = validate(&config(), "SELECT * FROM default.a WHERE '2024-01-01' >= time").unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM default.a WHERE '2024-01-01' >= time AND default.a.time >= now() - INTERVAL 30 DAY"
        );
    }

    #[test]
    fn test_between_checked() {
        let err = validate(
            &config(),
            "SELECT * FROM default.a WHERE t.TIME BETWEEN '2020-01-01' AND now()",
        )
        .unwrap_err();
        assert!(matches!(err, RewriteError::RetentionExceeded { .. }));
    }

    #[test]
    fn test_missing_bound_injected() {
        assert_eq!(
            validate(&config(), "SELECT count(*) FROM default.a").unwrap(),
            "SELECT count(*) FROM default.a WHERE default.a.time >= now() - INTERVAL 30 DAY"
        );
    }

    #[test]
    fn test_bound_under_or_validated_but_not_counted() {
        let err = validate(
            &config(),
            "SELECT * FROM default.a WHERE x = 1 OR time > '2020-01-01'",
        )
        .unwrap_err();
        assert!(matches!(err, RewriteError::RetentionExceeded { .. }));

        let sql = validate(
            &config(),
            "SELECT * FROM default.a WHERE x = 1 OR time > now() - INTERVAL 1 DAY",
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM default.a WHERE (x = 1 OR time > now() - INTERVAL 1 DAY) \
             AND default.a.time >= now() - INTERVAL 30 DAY"
        );
    }

    #[test]
    fn test_every_reading_select_bounded() {
        let sql = validate(
            &config(),
            "SELECT * FROM (SELECT * FROM default.a) AS sub WHERE time >= now() - INTERVAL 1 DAY",
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT * FROM default.a WHERE default.a.time >= now() - INTERVAL 30 DAY) AS sub \
             WHERE time >= now() - INTERVAL 1 DAY"
        );
    }

    #[test]
    fn test_injected_bound_counts_on_rerun() {
        let once = validate(&config(), "SELECT count(*) FROM default.a").unwrap();
        assert_eq!(validate(&config(), &once).unwrap(), once);
    }

    #[test]
    fn test_join_bounds_tracked_per_table() {
        let sql = validate(
            &config(),
            "SELECT * FROM default.a AS x JOIN default.b AS y ON x.id = y.id \
             WHERE x.time >= now() - INTERVAL 1 DAY",
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM default.a AS x JOIN default.b AS y ON x.id = y.id \
             WHERE x.time >= now() - INTERVAL 1 DAY AND y.time >= now() - INTERVAL 30 DAY"
        );

        let sql = "SELECT * FROM default.a AS x JOIN default.b AS y ON x.id = y.id \
                   WHERE x.time >= now() - INTERVAL 1 DAY AND y.time >= now() - INTERVAL 2 DAY";
        assert_eq!(validate(&config(), sql).unwrap(), sql);
    }

    #[test]
    fn test_unqualified_bound_in_join_does_not_count() {
        let sql = validate(
            &config(),
            "SELECT * FROM default.a JOIN default.b ON a.id = b.id WHERE time >= now() - INTERVAL 1 DAY",
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM default.a JOIN default.b ON a.id = b.id \
             WHERE time >= now() - INTERVAL 1 DAY \
             AND default.a.time >= now() - INTERVAL 30 DAY AND default.b.time >= now() - INTERVAL 30 DAY"
        );
    }

    #[test]
    fn test_bound_by_table_name_counts() {
        let sql = "SELECT * FROM default.a JOIN default.b ON a.id = b.id \
                   WHERE a.time >= now() - INTERVAL 1 DAY AND default.b.time >= now() - INTERVAL 1 DAY";
        assert_eq!(validate(&config(), sql).unwrap(), sql);
    }

    /// A `SELECT`-list alias named like the time column turns `time` in
    /// `WHERE` into the alias, so the caller's bound says nothing about the rows.
    #[test]
    fn test_shadowing_alias_does_not_establish_bound() {
        let sql = validate(
            &config(),
            "SELECT *, now() AS time FROM default.a WHERE time >= now() - INTERVAL 1 DAY",
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT *, now() AS time FROM default.a \
             WHERE time >= now() - INTERVAL 1 DAY AND default.a.time >= now() - INTERVAL 30 DAY"
        );
    }

    #[test]
    fn test_bound_in_subquery_checked() {
        let err = validate(
            &config(),
            "SELECT * FROM default.a WHERE time > now() - INTERVAL 1 DAY \
             AND id IN (SELECT id FROM default.b WHERE time > '2001-01-01')",
        )
        .unwrap_err();
        assert!(matches!(err, RewriteError::RetentionExceeded { .. }));
    }

    #[test]
    fn test_disabled_window_is_noop() {
        let config = QueryConfig::new("ws_1");
        let sql = "SELECT * FROM default.a WHERE time > '1999-01-01'";
        assert_eq!(validate(&config, sql).unwrap(), sql);
    }

    #[test]
    fn test_unevaluable_bound_fails_open_by_default() {
        let sql = "SELECT * FROM default.a WHERE time >= other_time";
        assert_eq!(validate(&config(), sql).unwrap(), sql);
    }

    #[test]
    fn test_unevaluable_bound_rejected_when_strict() {
        let config = config().with_strict_time_bounds(true);
        let err = validate(&config, "SELECT * FROM default.a WHERE time >= other_time").unwrap_err();
        assert_eq!(
            err,
            RewriteError::UnsupportedTimeExpression {
                expression: "other_time".to_string()
            }
        );
    }
}
