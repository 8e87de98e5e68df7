//! Function allowlist validation.

use std::ops::ControlFlow;

use scopeql_core::QueryConfig;
use sqlparser::ast::{Expr, Statement, Visit, Visitor};

use crate::error::RewriteError;
use crate::parser::object_name_parts;

/// Rejects any function call that is not on the configured allowlist.
pub struct FunctionAllowlistValidator<'a> {
    config: &'a QueryConfig,
}

impl<'a> FunctionAllowlistValidator<'a> {
    pub fn new(config: &'a QueryConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, statement: &Statement) -> Result<(), RewriteError> {
        match statement.visit(&mut Check {
            config: self.config,
        }) {
            ControlFlow::Break(err) => Err(err),
            ControlFlow::Continue(()) => Ok(()),
        }
    }
}

struct Check<'a> {
    config: &'a QueryConfig,
}

impl Visitor for Check<'_> {
    type Break = RewriteError;

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if let Expr::Function(function) = expr {
            let name = object_name_parts(&function.name)
                .map(|parts| parts.join("."))
                .unwrap_or_else(|| function.name.to_string());

            if !self.config.is_function_allowed(&name) {
                return ControlFlow::Break(RewriteError::FunctionNotAllowed { name });
            }
        }
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::StatementParser;

    fn validate(sql: &str) -> Result<(), RewriteError> {
        let config = QueryConfig::new("ws_1");
        let statement = StatementParser::new().parse(sql)?;
        FunctionAllowlistValidator::new(&config).validate(&statement)
    }

    #[test]
    fn test_allowed_functions_case_insensitive() {
        assert!(validate("SELECT COUNT(*), toStartOfHour(time) FROM default.events").is_ok());
        assert!(validate("SELECT countIf(outcome = 'VALID') FROM default.events").is_ok());
    }

    #[test]
    fn test_disallowed_function_rejected() {
        let err = validate("SELECT currentUser() FROM default.events").unwrap_err();
        assert_eq!(
            err,
            RewriteError::FunctionNotAllowed {
                name: "currentUser".to_string()
            }
        );
    }

    #[test]
    fn test_nested_function_rejected() {
        let err = validate("SELECT count(*) FROM default.events WHERE lower(getSetting('x')) = 'a'")
            .unwrap_err();
        assert_eq!(
            err,
            RewriteError::FunctionNotAllowed {
                name: "getSetting".to_string()
            }
        );
    }

    #[test]
    fn test_function_in_subquery_rejected() {
        let err = validate(
            "SELECT * FROM default.events WHERE id IN (SELECT max(id) FROM default.other WHERE hostName() = 'x')",
        )
        .unwrap_err();
        assert!(matches!(err, RewriteError::FunctionNotAllowed { .. }));
    }

    #[test]
    fn test_custom_allowlist_replaces_defaults() {
        let mut config = QueryConfig::new("ws_1");
        config.allowed_functions = ["sum".to_string()].into_iter().collect();
        let statement = StatementParser::new()
            .parse("SELECT count(*) FROM default.events")
            .unwrap();
        let err = FunctionAllowlistValidator::new(&config)
            .validate(&statement)
            .unwrap_err();
        assert!(matches!(err, RewriteError::FunctionNotAllowed { .. }));
    }
}
