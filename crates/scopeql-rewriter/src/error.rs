//! Error types for the rewriter crate.

use thiserror::Error;

/// Reasons a query is refused.
///
/// Every variant is caused by the caller's input and is a deterministic
/// function of the query and configuration. The `Display` text is the
/// internal diagnostic; [`RewriteError::public_message`] is what callers see.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    /// SQL parsing failed.
    #[error("failed to parse SQL: {0}")]
    SyntaxError(String),

    /// The statement is not a single read-only SELECT.
    #[error("unsupported statement type: {statement}")]
    UnsupportedStatementType { statement: String },

    /// The SELECT does not read from any table.
    #[error("query has no FROM clause")]
    NoFromClause,

    /// Table missing from the allowlist, a system table, or a table function.
    #[error("access to table {table} is not allowed")]
    TableNotAllowed { table: String },

    /// Function missing from the allowlist.
    #[error("function {name} is not allowed")]
    FunctionNotAllowed { name: String },

    /// The query's lower time bound predates the retention window.
    #[error("query reaches back to {requested_date}, earliest allowed is {earliest_allowed_date}")]
    RetentionExceeded {
        requested_date: String,
        earliest_allowed_date: String,
    },

    /// Query-level clause that changes execution or output handling.
    #[error("clause {clause} is not allowed")]
    ClauseNotAllowed { clause: String },

    /// Lower time bound that cannot be evaluated (strict mode only).
    #[error("cannot evaluate time bound: {expression}")]
    UnsupportedTimeExpression { expression: String },
}

impl RewriteError {
    /// Stable identifier for mapping errors to transport status codes.
    pub fn code(&self) -> &'static str {
        match self {
            RewriteError::SyntaxError(_) => "syntax_error",
            RewriteError::UnsupportedStatementType { .. } => "unsupported_statement_type",
            RewriteError::NoFromClause => "no_from_clause",
            RewriteError::TableNotAllowed { .. } => "table_not_allowed",
            RewriteError::FunctionNotAllowed { .. } => "function_not_allowed",
            RewriteError::RetentionExceeded { .. } => "retention_exceeded",
            RewriteError::ClauseNotAllowed { .. } => "clause_not_allowed",
            RewriteError::UnsupportedTimeExpression { .. } => "unsupported_time_expression",
        }
    }

    /// Message safe to return to the caller.
    ///
    /// Names the offending table, function or date: these come from the
    /// caller's own query and are not sensitive.
    pub fn public_message(&self) -> String {
        match self {
            RewriteError::SyntaxError(detail) => format!("Invalid SQL syntax: {}", detail),
            RewriteError::UnsupportedStatementType { statement } => format!(
                "Only SELECT queries are supported, got {}",
                statement
            ),
            RewriteError::NoFromClause => "Query must select FROM a table".to_string(),
            RewriteError::TableNotAllowed { table } => {
                format!("Access to table '{}' is not allowed", table)
            }
            RewriteError::FunctionNotAllowed { name } => {
                format!("Function '{}' is not allowed", name)
            }
            RewriteError::RetentionExceeded {
                requested_date,
                earliest_allowed_date,
            } => format!(
                "Query requests data from {}, but your retention allows data from {} onwards",
                requested_date, earliest_allowed_date
            ),
            RewriteError::ClauseNotAllowed { clause } => {
                format!("The {} clause is not allowed", clause)
            }
            RewriteError::UnsupportedTimeExpression { expression } => format!(
                "Unable to determine the time range of '{}'; use a literal date or now() - INTERVAL",
                expression
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_names_offender() {
        let err = RewriteError::TableNotAllowed {
            table: "system.tables".to_string(),
        };
        assert_eq!(err.code(), "table_not_allowed");
        assert!(err.public_message().contains("system.tables"));

        let err = RewriteError::RetentionExceeded {
            requested_date: "2024-01-01".to_string(),
            earliest_allowed_date: "2024-03-01".to_string(),
        };
        assert!(err.public_message().contains("2024-01-01"));
        assert!(err.to_string().contains("2024-03-01"));
    }
}
