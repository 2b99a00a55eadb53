//! Tolerance-aware value comparison for test case verdicts.

use crate::value::Value;

/// Compare an actual value against the expected one.
///
/// Numbers compare exactly unless `tolerance` is given, in which case the
/// absolute difference must not exceed it. `NaN` equals `NaN`, and
/// non-finite values only match the identical non-finite value. Everything
/// else is structural equality, with the numeric rules (tolerance included)
/// applied to numbers nested inside arrays and objects.
pub fn values_match(actual: &Value, expected: &Value, tolerance: Option<f64>) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => numbers_match(*a, *b, tolerance),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|(x, y)| values_match(x, y, tolerance))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, x)| {
                    b.get(key)
                        .is_some_and(|y| values_match(x, y, tolerance))
                })
        }
        // Opaque values carry no data to compare
        (Value::Opaque(_), _) | (_, Value::Opaque(_)) => false,
        (a, b) => a == b,
    }
}

fn numbers_match(actual: f64, expected: f64, tolerance: Option<f64>) -> bool {
    if actual.is_nan() || expected.is_nan() {
        return actual.is_nan() && expected.is_nan();
    }
    if actual.is_infinite() || expected.is_infinite() {
        return actual == expected;
    }
    match tolerance {
        Some(tol) => (actual - expected).abs() <= tol,
        None => actual == expected,
    }
}
