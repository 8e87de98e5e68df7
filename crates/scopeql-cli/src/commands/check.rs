//! `scopeql check` command implementation.
//!
//! Validates a query configuration file:
//! - JSON Schema validation against `schemas/QueryConfig.schema.json`
//! - The same semantic checks the rewriter relies on
//! - Warnings for settings that are valid but probably unintended

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;

use scopeql_core::QueryConfig;

/// Compiled into the binary so validation works without external files.
const QUERY_CONFIG_SCHEMA: &str = include_str!("../../../../schemas/QueryConfig.schema.json");

/// Severity level for check results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single check finding.
#[derive(Debug, Clone)]
pub struct CheckFinding {
    pub severity: Severity,
    /// Category of the check that produced this finding.
    pub category: String,
    pub message: String,
    /// Location within the file, e.g. "/allowed_tables/0".
    pub location: Option<String>,
}

impl CheckFinding {
    fn error(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category: category.into(),
            message: message.into(),
            location: None,
        }
    }

    fn warning(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            category: category.into(),
            message: message.into(),
            location: None,
        }
    }

    fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Results from running all checks.
#[derive(Debug, Default)]
pub struct CheckResults {
    pub findings: Vec<CheckFinding>,
}

impl CheckResults {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    /// Print a human-readable summary.
    pub fn print_summary(&self, config_path: &Path) {
        let mut findings: Vec<_> = self.findings.iter().collect();
        findings.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.category.cmp(&b.category)));

        for finding in &findings {
            let location = finding
                .location
                .as_deref()
                .map(|l| format!(" [{}]", l))
                .unwrap_or_default();
            println!(
                "{} [{}]{}: {}",
                finding.severity, finding.category, location, finding.message
            );
        }

        let errors = self.count(Severity::Error);
        let warnings = self.count(Severity::Warning);
        if errors == 0 && warnings == 0 {
            println!("{}: all checks passed", config_path.display());
        } else {
            println!(
                "{}: {} error(s), {} warning(s)",
                config_path.display(),
                errors,
                warnings
            );
        }
    }
}

/// Run all checks against a configuration file.
pub fn run(config_path: &Path) -> Result<CheckResults> {
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;

    let mut results = CheckResults::default();
    results.findings.extend(validate_schema(&content)?);

    let config = match QueryConfig::from_yaml(&content) {
        Ok(config) => config,
        Err(e) => {
            results
                .findings
                .push(CheckFinding::error("parse", e.to_string()));
            return Ok(results);
        }
    };

    if let Err(e) = config.validate() {
        results
            .findings
            .push(CheckFinding::error("semantics", e.to_string()));
    }
    results.findings.extend(check_settings(&config));

    Ok(results)
}

fn validate_schema(content: &str) -> Result<Vec<CheckFinding>> {
    let schema: JsonValue =
        serde_json::from_str(QUERY_CONFIG_SCHEMA).context("Embedded schema is not valid JSON")?;

    let instance: JsonValue = match serde_yaml::from_str(content) {
        Ok(value) => value,
        Err(e) => {
            return Ok(vec![CheckFinding::error(
                "json-schema",
                format!("Failed to parse YAML: {}", e),
            )]);
        }
    };

    let validator = match jsonschema::validator_for(&schema) {
        Ok(validator) => validator,
        Err(e) => {
            return Ok(vec![CheckFinding::error(
                "json-schema",
                format!("Failed to compile JSON schema: {}", e),
            )]);
        }
    };

    Ok(validator
        .iter_errors(&instance)
        .map(|error| {
            let path = error.instance_path().to_string();
            let location = if path.is_empty() {
                "(root)".to_string()
            } else {
                path
            };
            CheckFinding::error("json-schema", error.to_string()).with_location(location)
        })
        .collect())
}

fn check_settings(config: &QueryConfig) -> Vec<CheckFinding> {
    let mut findings = Vec::new();

    if config.allowed_tables.is_empty() {
        findings.push(CheckFinding::warning(
            "tables",
            "allowed_tables is empty, every query will be rejected",
        ));
    }

    for (alias, target) in &config.table_aliases {
        if !config.is_table_allowed(target) {
            findings.push(
                CheckFinding::warning(
                    "tables",
                    format!("alias '{}' points to '{}', which is not in allowed_tables", alias, target),
                )
                .with_location(format!("/table_aliases/{}", alias)),
            );
        }
    }

    if config.max_query_range_days <= 0 {
        findings.push(CheckFinding::warning(
            "retention",
            "max_query_range_days is not positive, time ranges will not be checked",
        ));
    }

    if config.max_result_rows == 0 {
        findings.push(CheckFinding::warning(
            "limit",
            "max_result_rows is 0, every query will return no rows",
        ));
    }

    for filter in &config.security_filters {
        if filter.allowed_values.is_empty() {
            findings.push(CheckFinding::warning(
                "security-filters",
                format!("security filter on '{}' has no values and denies every row", filter.column),
            ));
        }
    }

    findings
}
