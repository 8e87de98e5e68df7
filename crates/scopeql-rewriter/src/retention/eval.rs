//! Evaluation of time-bound expressions to concrete instants.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use sqlparser::ast::{
    BinaryOperator, Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments, UnaryOperator,
    Value,
};

const STRING_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

/// Evaluates the value side of a time comparison relative to a fixed "now".
#[derive(Debug, Clone, Copy)]
pub struct TimestampEvaluator {
    now: DateTime<Utc>,
}

impl TimestampEvaluator {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Evaluate an expression to an instant, or `None` when its shape is not understood.
    ///
    /// Numbers are Unix milliseconds. Arithmetic that overflows saturates at
    /// the representable range.
    pub fn evaluate(&self, expr: &Expr) -> Option<DateTime<Utc>> {
        match expr {
            Expr::Nested(inner) => self.evaluate(inner),
            Expr::Cast { expr, .. } => self.evaluate(expr),
            Expr::Value(value) => match &value.value {
                Value::SingleQuotedString(text) | Value::DoubleQuotedString(text) => {
                    parse_timestamp(text)
                }
                _ => integer(expr).and_then(DateTime::from_timestamp_millis),
            },
            Expr::UnaryOp {
                op: UnaryOperator::Minus,
                ..
            } => integer(expr).and_then(DateTime::from_timestamp_millis),
            // DATE '2024-01-01', TIMESTAMP '2024-01-01 00:00:00'
            Expr::TypedString { .. } => {
                let rendered = expr.to_string();
                let start = rendered.find('\'')?;
                let end = rendered.rfind('\'')?;
                (end > start).then(|| parse_timestamp(&rendered[start + 1..end]))?
            }
            Expr::Function(function) => self.evaluate_function(function),
            Expr::BinaryOp {
                left,
                op: op @ (BinaryOperator::Plus | BinaryOperator::Minus),
                right,
            } => {
                let (base, delta) = match (interval(right), interval(left)) {
                    (Some(delta), _) => (self.evaluate(left)?, delta),
                    (None, Some(delta)) if *op == BinaryOperator::Plus => {
                        (self.evaluate(right)?, delta)
                    }
                    _ => return None,
                };
                Some(match op {
                    BinaryOperator::Plus => base
                        .checked_add_signed(delta)
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                    _ => base
                        .checked_sub_signed(delta)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC),
                })
            }
            _ => None,
        }
    }

    fn evaluate_function(&self, function: &Function) -> Option<DateTime<Utc>> {
        let name = function.name.to_string().to_lowercase();
        let args = unnamed_args(function);

        match name.as_str() {
            "now" | "now64" | "today" => Some(self.now),
            "yesterday" => self.now.checked_sub_signed(TimeDelta::try_days(1)?),
            "date_trunc" => self.evaluate(args.get(1)?),
            "todate"
            | "todatetime"
            | "todatetime64"
            | "formatdatetime"
            | "tounixtimestamp64milli"
            | "fromunixtimestamp64milli" => self.evaluate(args.first()?),
            other if other.starts_with("tostartof") => self.evaluate(args.first()?),
            _ => None,
        }
    }
}

/// Parse a time literal as RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in STRING_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
}

/// Duration of an interval expression.
///
/// Accepts `INTERVAL 30 DAY`, `INTERVAL '30 days'`, `INTERVAL '30' DAY` and
/// ClickHouse's `toIntervalDay(30)` family.
pub fn interval(expr: &Expr) -> Option<TimeDelta> {
    match expr {
        Expr::Nested(inner) => interval(inner),
        Expr::Interval(interval) => match &interval.leading_field {
            Some(field) => {
                let count = integer(&interval.value).or_else(|| {
                    string_value(&interval.value).and_then(|text| text.trim().parse().ok())
                })?;
                unit_duration(count, &field.to_string())
            }
            None => {
                let text = string_value(&interval.value)?;
                let mut parts = text.split_whitespace();
                let count = parts.next()?.parse().ok()?;
                let unit = parts.next()?;
                if parts.next().is_some() {
                    return None;
                }
                unit_duration(count, unit)
            }
        },
        Expr::Function(function) => {
            let name = function.name.to_string().to_lowercase();
            let unit = name.strip_prefix("tointerval")?;
            let args = unnamed_args(function);
            let [count] = args.as_slice() else {
                return None;
            };
            unit_duration(integer(count)?, unit)
        }
        _ => None,
    }
}

/// Duration of `count` units. Months, quarters and years are fixed-length
/// approximations.
pub fn unit_duration(count: i64, unit: &str) -> Option<TimeDelta> {
    let unit = unit.trim().to_uppercase();
    let unit = unit.strip_suffix('S').unwrap_or(&unit);
    let seconds_per_unit: i64 = match unit {
        "SECOND" => 1,
        "MINUTE" => 60,
        "HOUR" => 3_600,
        "DAY" => 86_400,
        "WEEK" => 7 * 86_400,
        "MONTH" => 30 * 86_400,
        "QUARTER" => 90 * 86_400,
        "YEAR" => 365 * 86_400,
        _ => return None,
    };
    TimeDelta::try_seconds(count.checked_mul(seconds_per_unit)?)
}

fn unnamed_args(function: &Function) -> Vec<&Expr> {
    let FunctionArguments::List(list) = &function.args else {
        return Vec::new();
    };
    list.args
        .iter()
        .filter_map(|arg| match arg {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Some(expr),
            _ => None,
        })
        .collect()
}

fn integer(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Value(value) => match &value.value {
            Value::Number(number, _) => number.parse().ok(),
            _ => None,
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => integer(expr)?.checked_neg(),
        Expr::Nested(inner) => integer(inner),
        _ => None,
    }
}

fn string_value(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Value(value) => match &value.value {
            Value::SingleQuotedString(text) | Value::DoubleQuotedString(text) => Some(text.as_str()),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::StatementParser;

    fn now() -> DateTime<Utc> {
        parse_timestamp("2024-06-30T12:00:00Z").unwrap()
    }

    fn eval(sql: &str) -> Option<DateTime<Utc>> {
        let expr = StatementParser::new().parse_expr(sql).unwrap();
        TimestampEvaluator::new(now()).evaluate(&expr)
    }

    fn at(text: &str) -> Option<DateTime<Utc>> {
        Some(parse_timestamp(text).unwrap())
    }

    #[test]
    fn test_string_literals() {
        assert_eq!(eval("'2024-06-01'"), at("2024-06-01T00:00:00Z"));
        assert_eq!(eval("'2024-06-01 08:30:00'"), at("2024-06-01T08:30:00Z"));
        assert_eq!(eval("'2024-06-01T08:30:00+02:00'"), at("2024-06-01T06:30:00Z"));
        assert_eq!(eval("'yesterday-ish'"), None);
    }

    #[test]
    fn test_numeric_literal_is_millis() {
        assert_eq!(eval("1717200000000"), at("2024-06-01T00:00:00Z"));
    }

    #[test]
    fn test_now_and_interval_arithmetic() {
        assert_eq!(eval("now()"), Some(now()));
        assert_eq!(eval("now() - INTERVAL 30 DAY"), at("2024-05-31T12:00:00Z"));
        assert_eq!(eval("now() - INTERVAL '2' HOUR"), at("2024-06-30T10:00:00Z"));
        assert_eq!(eval("now() - toIntervalWeek(1)"), at("2024-06-23T12:00:00Z"));
        assert_eq!(eval("today() - INTERVAL 1 MONTH"), at("2024-05-31T12:00:00Z"));
        assert_eq!(eval("now() - INTERVAL 1 QUARTER"), at("2024-04-01T12:00:00Z"));
        assert_eq!(eval("'2024-06-01' + INTERVAL 1 DAY"), at("2024-06-02T00:00:00Z"));
    }

    #[test]
    fn test_wrappers_recurse() {
        assert_eq!(eval("toStartOfDay(now() - INTERVAL 1 DAY)"), at("2024-06-29T12:00:00Z"));
        assert_eq!(eval("toDateTime('2024-06-01 00:00:00')"), at("2024-06-01T00:00:00Z"));
        assert_eq!(eval("date_trunc('day', now())"), Some(now()));
        assert_eq!(eval("fromUnixTimestamp64Milli(1717200000000)"), at("2024-06-01T00:00:00Z"));
        assert_eq!(eval("(now())"), Some(now()));
    }

    #[test]
    fn test_unknown_shapes() {
        assert_eq!(eval("someColumn"), None);
        assert_eq!(eval("randomFunction()"), None);
        assert_eq!(eval("now() - toIntervalFortnight(3)"), None);
    }

    #[test]
    fn test_overflow_saturates() {
        assert_eq!(
            eval("now() - INTERVAL 9223372036854775807 SECOND"),
            None,
            "seconds beyond TimeDelta range are not an interval"
        );
        assert_eq!(eval("now() - INTERVAL 100000000 YEAR"), Some(DateTime::<Utc>::MIN_UTC));
    }

    #[test]
    fn test_unit_duration() {
        assert_eq!(unit_duration(2, "days"), TimeDelta::try_days(2));
        assert_eq!(unit_duration(1, "Year"), TimeDelta::try_days(365));
        assert_eq!(unit_duration(i64::MAX, "YEAR"), None);
    }
}
