//! Per-caller query configuration.
//!
//! A `QueryConfig` is immutable for the duration of one rewrite and is
//! passed explicitly to every stage of the pipeline. There is no process-wide
//! tenant state.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use super::functions::default_allowed_functions;
use super::ConfigError;

/// Default cap on the number of rows a single query may return.
pub const DEFAULT_MAX_RESULT_ROWS: u64 = 10_000;

/// Configuration for rewriting one caller's queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Tenant identifier every query is scoped to.
    pub workspace_id: String,

    /// Canonical `database.table` names the caller may read.
    /// An empty set denies every table.
    #[serde(default)]
    pub allowed_tables: BTreeSet<String>,

    /// Friendly table names mapped to their canonical `database.table` form.
    #[serde(default)]
    pub table_aliases: HashMap<String, String>,

    /// How many days back a query may reach. `<= 0` disables the check.
    #[serde(default)]
    pub max_query_range_days: i64,

    /// Maximum number of rows returned by one query.
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: u64,

    /// Functions callers may use (matched case-insensitively).
    #[serde(default = "default_allowed_functions")]
    pub allowed_functions: BTreeSet<String>,

    /// Additional column scopes mandated by the caller's permissions.
    #[serde(default)]
    pub security_filters: Vec<SecurityFilter>,

    /// Column holding the tenant identifier.
    #[serde(default = "default_workspace_column")]
    pub workspace_column: String,

    /// Column holding the row timestamp.
    #[serde(default = "default_time_column")]
    pub time_column: String,

    /// Reject lower time bounds whose value cannot be evaluated instead of
    /// treating them as "now".
    #[serde(default)]
    pub strict_time_bounds: bool,
}

/// Restricts a column to a fixed set of values on every queried table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFilter {
    /// Column to restrict.
    pub column: String,

    /// Values the column may take. An empty list denies every row.
    #[serde(default)]
    pub allowed_values: Vec<String>,
}

impl SecurityFilter {
    pub fn new(column: impl Into<String>, allowed_values: Vec<String>) -> Self {
        Self {
            column: column.into(),
            allowed_values,
        }
    }
}

impl QueryConfig {
    /// Create a configuration for a workspace with everything else defaulted.
    ///
    /// Note that the default allows no tables at all.
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            allowed_tables: BTreeSet::new(),
            table_aliases: HashMap::new(),
            max_query_range_days: 0,
            max_result_rows: default_max_result_rows(),
            allowed_functions: default_allowed_functions(),
            security_filters: Vec::new(),
            workspace_column: default_workspace_column(),
            time_column: default_time_column(),
            strict_time_bounds: false,
        }
    }

    pub fn with_allowed_table(mut self, table: impl Into<String>) -> Self {
        self.allowed_tables.insert(table.into());
        self
    }

    pub fn with_table_alias(mut self, alias: impl Into<String>, table: impl Into<String>) -> Self {
        self.table_aliases.insert(alias.into(), table.into());
        self
    }

    pub fn with_max_query_range_days(mut self, days: i64) -> Self {
        self.max_query_range_days = days;
        self
    }

    pub fn with_max_result_rows(mut self, rows: u64) -> Self {
        self.max_result_rows = rows;
        self
    }

    pub fn with_security_filter(mut self, filter: SecurityFilter) -> Self {
        self.security_filters.push(filter);
        self
    }

    pub fn with_strict_time_bounds(mut self, strict: bool) -> Self {
        self.strict_time_bounds = strict;
        self
    }

    /// Load a configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse a configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Check the configuration for values the rewriter cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace_id.trim().is_empty() {
            return Err(ConfigError::Invalid("workspace_id must not be empty".to_string()));
        }

        for table in &self.allowed_tables {
            if !is_canonical(table) {
                return Err(ConfigError::Invalid(format!(
                    "allowed table '{}' must have the form database.table",
                    table
                )));
            }
        }

        for (alias, target) in &self.table_aliases {
            if !is_canonical(target) {
                return Err(ConfigError::Invalid(format!(
                    "alias '{}' must point to a database.table name, got '{}'",
                    alias, target
                )));
            }
        }

        for (name, column) in [
            ("workspace_column", &self.workspace_column),
            ("time_column", &self.time_column),
        ] {
            if column.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", name)));
            }
        }

        if self.security_filters.iter().any(|f| f.column.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "security filter column must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve a table name through the alias map (case-insensitive).
    ///
    /// Names without an alias are returned unchanged.
    pub fn resolve_table<'a>(&'a self, name: &'a str) -> &'a str {
        self.table_aliases
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
            .map(|(_, target)| target.as_str())
            .unwrap_or(name)
    }

    /// Check whether a canonical table name is on the allowlist.
    pub fn is_table_allowed(&self, canonical: &str) -> bool {
        self.allowed_table(canonical).is_some()
    }

    /// The allowlist entry matching a canonical name, in its configured spelling.
    pub fn allowed_table(&self, canonical: &str) -> Option<&str> {
        self.allowed_tables
            .iter()
            .find(|table| table.eq_ignore_ascii_case(canonical))
            .map(String::as_str)
    }

    /// Check whether a function may be called.
    pub fn is_function_allowed(&self, name: &str) -> bool {
        self.allowed_functions
            .iter()
            .any(|function| function.eq_ignore_ascii_case(name))
    }
}

fn is_canonical(table: &str) -> bool {
    match table.split_once('.') {
        Some((database, name)) => {
            !database.is_empty() && !name.is_empty() && !name.contains('.')
        }
        None => false,
    }
}

// Default value functions
fn default_max_result_rows() -> u64 {
    DEFAULT_MAX_RESULT_ROWS
}

fn default_workspace_column() -> String {
    "workspace_id".to_string()
}

fn default_time_column() -> String {
    "time".to_string()
}
