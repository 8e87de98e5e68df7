//! Building and attaching `WHERE` predicates.

use sqlparser::ast::{BinaryOperator, Expr, Ident, Value};

/// Column reference, qualified when `qualifier` is non-empty.
pub(crate) fn column_ref(qualifier: &[Ident], column: &str) -> Expr {
    if qualifier.is_empty() {
        return Expr::Identifier(Ident::new(column));
    }
    let mut idents = qualifier.to_vec();
    idents.push(Ident::new(column));
    Expr::CompoundIdentifier(idents)
}

pub(crate) fn string_literal(value: &str) -> Expr {
    Expr::value(Value::SingleQuotedString(value.to_string()))
}

pub(crate) fn number_literal(value: i64) -> Expr {
    Expr::value(Value::Number(value.to_string(), false))
}

pub(crate) fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Expr {
    Expr::BinaryOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

/// AND a predicate onto an optional `WHERE` clause.
///
/// Returns `false`, leaving the clause untouched, when the predicate is
/// already one of its top-level conjuncts.
pub(crate) fn and_predicate(selection: &mut Option<Expr>, predicate: Expr) -> bool {
    if has_conjunct(selection.as_ref(), &predicate) {
        return false;
    }

    *selection = Some(match selection.take() {
        None => predicate,
        Some(existing) => {
            // AND binds tighter than OR/XOR, so keep the caller's clause whole.
            let existing = match existing {
                Expr::BinaryOp {
                    op: BinaryOperator::Or | BinaryOperator::Xor,
                    ..
                } => Expr::Nested(Box::new(existing)),
                other => other,
            };
            binary(existing, BinaryOperator::And, predicate)
        }
    });
    true
}

/// Check whether `predicate` appears in the top-level `AND` chain of `selection`.
pub(crate) fn has_conjunct(selection: Option<&Expr>, predicate: &Expr) -> bool {
    let Some(selection) = selection else {
        return false;
    };
    let rendered = predicate.to_string();
    conjuncts(selection)
        .into_iter()
        .any(|conjunct| conjunct.to_string() == rendered)
}

/// Top-level conjuncts of an expression, looking through parentheses.
pub(crate) fn conjuncts(expr: &Expr) -> Vec<&Expr> {
    let mut out = Vec::new();
    collect_conjuncts(expr, &mut out);
    out
}

fn collect_conjuncts<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_conjuncts(left, out);
            collect_conjuncts(right, out);
        }
        Expr::Nested(inner) => collect_conjuncts(inner, out),
        other => out.push(other),
    }
}
