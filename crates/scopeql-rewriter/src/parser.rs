//! SQL parsing and statement shape checks.

use std::ops::ControlFlow;

use sqlparser::ast::{
    Ident, LimitClause, ObjectName, ObjectNamePart, Query, Select, SetExpr, Statement,
    TableAlias, TableFactor, Visit, Visitor,
};
use sqlparser::dialect::ClickHouseDialect;
use sqlparser::parser::Parser;

use crate::error::RewriteError;

/// Parses customer SQL and accepts only a single read-only `SELECT`.
pub struct StatementParser {
    dialect: ClickHouseDialect,
}

impl Default for StatementParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementParser {
    /// Create a new parser using the ClickHouse dialect.
    pub fn new() -> Self {
        Self {
            dialect: ClickHouseDialect {},
        }
    }

    /// Parse a SQL string into exactly one `SELECT` statement.
    pub fn parse(&self, sql: &str) -> Result<Statement, RewriteError> {
        let mut statements = Parser::parse_sql(&self.dialect, sql)
            .map_err(|e| RewriteError::SyntaxError(e.to_string()))?;

        match statements.len() {
            0 => return Err(RewriteError::SyntaxError("empty query".to_string())),
            1 => {}
            _ => {
                return Err(RewriteError::UnsupportedStatementType {
                    statement: "multiple statements".to_string(),
                });
            }
        }

        let statement = statements.remove(0);
        let Statement::Query(query) = &statement else {
            return Err(RewriteError::UnsupportedStatementType {
                statement: leading_keyword(&statement),
            });
        };

        if let ControlFlow::Break(err) = statement.visit(&mut QueryShapeCheck) {
            return Err(err);
        }
        require_from(&query.body)?;

        Ok(statement)
    }

    /// Parse a standalone expression, used for predicates built from trusted text.
    pub fn parse_expr(&self, sql: &str) -> Result<sqlparser::ast::Expr, RewriteError> {
        Parser::new(&self.dialect)
            .try_with_sql(sql)
            .and_then(|mut parser| parser.parse_expr())
            .map_err(|e| RewriteError::SyntaxError(e.to_string()))
    }
}

/// Rejects query bodies and clauses that are not plain reads.
struct QueryShapeCheck;

impl Visitor for QueryShapeCheck {
    type Break = RewriteError;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if query.settings.is_some() {
            return ControlFlow::Break(clause_not_allowed("SETTINGS"));
        }
        if query.format_clause.is_some() {
            return ControlFlow::Break(clause_not_allowed("FORMAT"));
        }
        if query.fetch.is_some() {
            return ControlFlow::Break(clause_not_allowed("FETCH"));
        }
        if let Some(LimitClause::LimitOffset { limit_by, .. }) = &query.limit_clause {
            if !limit_by.is_empty() {
                return ControlFlow::Break(clause_not_allowed("LIMIT BY"));
            }
        }

        match check_body(&query.body) {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => ControlFlow::Break(err),
        }
    }

    // `t ARRAY JOIN arr` has no node of its own: it parses as `t` aliased
    // `ARRAY` followed by a plain join of `arr`.
    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<Self::Break> {
        let is_array_join = table_alias(table_factor).is_some_and(|alias| {
            alias.name.quote_style.is_none() && alias.name.value.eq_ignore_ascii_case("array")
        });
        if is_array_join {
            return ControlFlow::Break(clause_not_allowed("ARRAY JOIN"));
        }
        ControlFlow::Continue(())
    }
}

fn table_alias(factor: &TableFactor) -> Option<&TableAlias> {
    match factor {
        TableFactor::Table { alias, .. }
        | TableFactor::Derived { alias, .. }
        | TableFactor::NestedJoin { alias, .. } => alias.as_ref(),
        _ => None,
    }
}

fn check_body(body: &SetExpr) -> Result<(), RewriteError> {
    match body {
        SetExpr::Select(select) if select.into.is_some() => {
            Err(RewriteError::UnsupportedStatementType {
                statement: "SELECT INTO".to_string(),
            })
        }
        SetExpr::Select(_) | SetExpr::Query(_) => Ok(()),
        SetExpr::SetOperation { left, right, .. } => {
            check_body(left)?;
            check_body(right)
        }
        other => Err(RewriteError::UnsupportedStatementType {
            statement: leading_keyword(other),
        }),
    }
}

fn require_from(body: &SetExpr) -> Result<(), RewriteError> {
    match body {
        SetExpr::Select(select) if select.from.is_empty() => Err(RewriteError::NoFromClause),
        SetExpr::Query(query) => require_from(&query.body),
        SetExpr::SetOperation { left, right, .. } => {
            require_from(left)?;
            require_from(right)
        }
        _ => Ok(()),
    }
}

fn clause_not_allowed(clause: &str) -> RewriteError {
    RewriteError::ClauseNotAllowed {
        clause: clause.to_string(),
    }
}

/// First keyword of a rendered node, e.g. `INSERT` for an insert statement.
pub(crate) fn leading_keyword(node: &impl std::fmt::Display) -> String {
    node.to_string()
        .split_whitespace()
        .next()
        .unwrap_or("UNKNOWN")
        .to_uppercase()
}

/// Identifier parts of an object name, or `None` if any part is not an identifier.
pub(crate) fn object_name_idents(name: &ObjectName) -> Option<Vec<Ident>> {
    name.0
        .iter()
        .map(|part| match part {
            ObjectNamePart::Identifier(ident) => Some(ident.clone()),
            #[allow(unreachable_patterns)]
            _ => None,
        })
        .collect()
}

/// Unquoted values of [`object_name_idents`].
pub(crate) fn object_name_parts(name: &ObjectName) -> Option<Vec<String>> {
    object_name_idents(name).map(|idents| idents.into_iter().map(|ident| ident.value).collect())
}

/// Build an object name from dotted parts.
pub(crate) fn object_name(parts: &[&str]) -> ObjectName {
    ObjectName::from(parts.iter().map(|part| Ident::new(*part)).collect::<Vec<_>>())
}

/// The `SELECT`s directly making up a query body.
///
/// Set operations are flattened; parenthesised sub-queries are left to the
/// visitor, which reaches them as queries of their own.
pub(crate) fn body_selects(body: &SetExpr) -> Vec<&Select> {
    let mut selects = Vec::new();
    collect_selects(body, &mut selects);
    selects
}

fn collect_selects<'a>(body: &'a SetExpr, out: &mut Vec<&'a Select>) {
    match body {
        SetExpr::Select(select) => out.push(select),
        SetExpr::SetOperation { left, right, .. } => {
            collect_selects(left, out);
            collect_selects(right, out);
        }
        _ => {}
    }
}

/// Mutable counterpart of [`body_selects`].
pub(crate) fn body_selects_mut(body: &mut SetExpr) -> Vec<&mut Select> {
    let mut selects = Vec::new();
    collect_selects_mut(body, &mut selects);
    selects
}

fn collect_selects_mut<'a>(body: &'a mut SetExpr, out: &mut Vec<&'a mut Select>) {
    match body {
        SetExpr::Select(select) => out.push(select),
        SetExpr::SetOperation { left, right, .. } => {
            collect_selects_mut(left, out);
            collect_selects_mut(right, out);
        }
        _ => {}
    }
}
