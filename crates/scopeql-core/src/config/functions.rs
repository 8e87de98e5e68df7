//! Built-in function allowlist.
//!
//! Aggregates, conditionals, arithmetic, string and date/time helpers that are
//! safe to expose to customers. Anything able to reach outside the queried
//! rows (`file`, `url`, `s3`, `remote`, `getSetting`, `currentUser`,
//! dictionary lookups, ...) is absent.

use std::collections::BTreeSet;

/// Lowercase names of the functions allowed when no explicit list is configured.
pub const DEFAULT_ALLOWED_FUNCTIONS: &[&str] = &[
    // aggregates
    "count",
    "countif",
    "sum",
    "sumif",
    "avg",
    "avgif",
    "min",
    "minif",
    "max",
    "maxif",
    "any",
    "anylast",
    "argmin",
    "argmax",
    "uniq",
    "uniqif",
    "uniqexact",
    "median",
    "quantile",
    "quantiles",
    "quantileexact",
    "topk",
    "groupuniqarray",
    // conditionals and null handling
    "if",
    "multiif",
    "coalesce",
    "ifnull",
    "nullif",
    "isnull",
    "isnotnull",
    // arithmetic
    "abs",
    "round",
    "floor",
    "ceil",
    "greatest",
    "least",
    "intdiv",
    "modulo",
    "plus",
    "minus",
    "multiply",
    "divide",
    // strings and arrays
    "lower",
    "upper",
    "length",
    "concat",
    "substring",
    "position",
    "startswith",
    "endswith",
    "like",
    "ilike",
    "notlike",
    "replaceall",
    "splitbychar",
    "trim",
    "empty",
    "notempty",
    "has",
    "hasany",
    "arrayjoin",
    "tostring",
    "toint64",
    "touint64",
    "tofloat64",
    // date and time
    "now",
    "now64",
    "today",
    "yesterday",
    "todate",
    "todatetime",
    "todatetime64",
    "tostartofminute",
    "tostartoffiveminutes",
    "tostartoffifteenminutes",
    "tostartofhour",
    "tostartofday",
    "tostartofweek",
    "tostartofmonth",
    "tostartofquarter",
    "tostartofyear",
    "tostartofinterval",
    "tomonday",
    "tohour",
    "todayofweek",
    "toyyyymm",
    "toyyyymmdd",
    "date_trunc",
    "datediff",
    "formatdatetime",
    "tounixtimestamp",
    "tounixtimestamp64milli",
    "fromunixtimestamp64milli",
    "tointervalsecond",
    "tointervalminute",
    "tointervalhour",
    "tointervalday",
    "tointervalweek",
    "tointervalmonth",
    "tointervalquarter",
    "tointervalyear",
];

/// The built-in allowlist as an owned set.
pub fn default_allowed_functions() -> BTreeSet<String> {
    DEFAULT_ALLOWED_FUNCTIONS
        .iter()
        .map(|name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_lowercase() {
        for name in DEFAULT_ALLOWED_FUNCTIONS {
            assert_eq!(*name, name.to_lowercase());
        }
    }

    #[test]
    fn test_out_of_band_readers_absent() {
        let allowed = default_allowed_functions();
        for name in ["file", "url", "s3", "remote", "getsetting", "currentuser", "dictget"] {
            assert!(!allowed.contains(name), "{name} must not be allowed");
        }
    }
}
