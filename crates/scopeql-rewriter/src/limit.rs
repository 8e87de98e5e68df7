//! Row cap on the outermost query.

use sqlparser::ast::{Expr, LimitClause, Statement, Value};

use crate::predicate::number_literal;

/// Caps the number of rows the outermost query returns.
#[derive(Debug, Clone, Copy)]
pub struct ResultLimiter {
    max_rows: u64,
}

impl ResultLimiter {
    pub fn new(max_rows: u64) -> Self {
        Self { max_rows }
    }

    /// Apply the cap, returning the effective limit.
    ///
    /// A literal limit at or below the cap is kept; a missing, non-literal or
    /// larger limit is replaced. `OFFSET` is left alone.
    pub fn apply(&self, statement: &mut Statement) -> u64 {
        let Statement::Query(query) = statement else {
            return self.max_rows;
        };

        if query.limit_clause.is_none() {
            query.limit_clause = Some(LimitClause::LimitOffset {
                limit: Some(self.cap()),
                offset: None,
                limit_by: Vec::new(),
            });
            return self.max_rows;
        }

        let limit = match &mut query.limit_clause {
            Some(LimitClause::LimitOffset { limit, .. }) => {
                match limit.as_ref().and_then(|expr| self.literal_within_cap(expr)) {
                    Some(kept) => kept,
                    None => {
                        *limit = Some(self.cap());
                        self.max_rows
                    }
                }
            }
            Some(LimitClause::OffsetCommaLimit { limit, .. }) => {
                match self.literal_within_cap(limit) {
                    Some(kept) => kept,
                    None => {
                        *limit = self.cap();
                        self.max_rows
                    }
                }
            }
            None => self.max_rows,
        };

        if limit == self.max_rows {
            tracing::debug!(limit, "Applied row cap");
        }
        limit
    }

    fn cap(&self) -> Expr {
        number_literal(i64::try_from(self.max_rows).unwrap_or(i64::MAX))
    }

    fn literal_within_cap(&self, expr: &Expr) -> Option<u64> {
        let Expr::Value(value) = expr else {
            return None;
        };
        let Value::Number(number, _) = &value.value else {
            return None;
        };
        number
            .parse::<u64>()
            .ok()
            .filter(|rows| *rows <= self.max_rows)
    }
}
