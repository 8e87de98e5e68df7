//! Literal values a query scopes a column to.
//!
//! Only positive conditions count: `col = 'v'` and `col IN ('a', 'b')`,
//! reached through `AND`, `OR` and parentheses. `!=`, `NOT IN` and anything
//! under `NOT` narrow a result without scoping it to a value, so they are
//! ignored.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::ops::ControlFlow;

use sqlparser::ast::{BinaryOperator, Expr, Query, Statement, Value, Visit, Visitor};

use crate::parser::body_selects;

/// Collects the string literals a column is compared to.
pub struct ColumnValueExtractor {
    column: String,
    values: BTreeSet<String>,
}

impl ColumnValueExtractor {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            values: BTreeSet::new(),
        }
    }

    pub fn extract(mut self, statement: &Statement) -> BTreeSet<String> {
        let _ = statement.visit(&mut self);
        self.values
    }

    fn collect(&mut self, expr: &Expr) {
        match expr {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And | BinaryOperator::Or,
                right,
            } => {
                self.collect(left);
                self.collect(right);
            }
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } => {
                if self.is_column(left) {
                    self.insert(right);
                } else if self.is_column(right) {
                    self.insert(left);
                }
            }
            Expr::InList {
                expr,
                list,
                negated: false,
            } if self.is_column(expr) => {
                for item in list {
                    self.insert(item);
                }
            }
            _ => {}
        }
    }

    fn is_column(&self, expr: &Expr) -> bool {
        let ident = match expr {
            Expr::Identifier(ident) => ident,
            Expr::CompoundIdentifier(idents) => match idents.last() {
                Some(ident) => ident,
                None => return false,
            },
            _ => return false,
        };
        ident.value.eq_ignore_ascii_case(&self.column)
    }

    fn insert(&mut self, expr: &Expr) {
        if let Expr::Value(value) = expr {
            if let Value::SingleQuotedString(text) | Value::DoubleQuotedString(text) = &value.value
            {
                self.values.insert(text.clone());
            }
        }
    }
}

impl Visitor for ColumnValueExtractor {
    type Break = Infallible;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        for select in body_selects(&query.body) {
            for clause in [&select.selection, &select.having].into_iter().flatten() {
                self.collect(clause);
            }
        }
        ControlFlow::Continue(())
    }
}
