//! # scopeql-core
//!
//! Configuration shared by the scopeql crates.
//!
//! A [`QueryConfig`] describes everything the rewriter needs to know about one
//! caller: which workspace (tenant) it belongs to, which tables it may read,
//! how far back in time it may query, and how many rows it may receive.
//! Configurations are usually loaded from YAML:
//!
//! ```yaml
//! workspace_id: ws_1
//! allowed_tables:
//!   - default.key_verifications_raw_v2
//! table_aliases:
//!   key_verifications: default.key_verifications_raw_v2
//! max_query_range_days: 30
//! ```

pub mod config;

pub use config::{
    default_allowed_functions, ConfigError, QueryConfig, SecurityFilter,
    DEFAULT_ALLOWED_FUNCTIONS, DEFAULT_MAX_RESULT_ROWS,
};
