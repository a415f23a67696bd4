//! Field value model shared by records, predicates and the store adapter.
//!
//! # Responsibility
//! - Represent the scalar values a record field can hold.
//! - Define the total order used by sort descriptors.
//!
//! # Invariants
//! - `Real` values are always finite; non-finite input is rejected by
//!   `Value::real`.
//! - Ordering is `Null < numbers < Text`; `Bool` orders as `0/1`, which is how
//!   SQLite's `json_extract` reports JSON booleans.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// Scalar value stored in a record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    /// Builds a real value, returning `None` for NaN or infinities.
    pub fn real(value: f64) -> Option<Self> {
        value.is_finite().then_some(Self::Real(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric view of integers and reals.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Real(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Short lowercase name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
        }
    }

    /// Total order used for sorting and range comparisons.
    ///
    /// Mirrors SQLite's cross-type ordering so that store-side `ORDER BY` and
    /// in-memory sorting agree.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self.rank(), other.rank()) {
            (left, right) if left != right => left.cmp(&right),
            (0, _) => Ordering::Equal,
            (1, _) => compare_numbers(self, other),
            _ => self
                .as_str()
                .unwrap_or_default()
                .as_bytes()
                .cmp(other.as_str().unwrap_or_default().as_bytes()),
        }
    }

    pub(crate) fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(value) => serde_json::Value::Bool(*value),
            Self::Integer(value) => serde_json::Value::from(*value),
            Self::Real(value) => serde_json::Number::from_f64(*value)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(value) => serde_json::Value::String(value.clone()),
        }
    }

    /// Converts one JSON scalar; arrays and objects are not field values.
    pub(crate) fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(value) => Some(Self::Bool(*value)),
            serde_json::Value::Number(number) => number
                .as_i64()
                .map(Self::Integer)
                .or_else(|| number.as_f64().and_then(Self::real)),
            serde_json::Value::String(value) => Some(Self::Text(value.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) | Self::Integer(_) | Self::Real(_) => 1,
            Self::Text(_) => 2,
        }
    }

    fn numeric_view(&self) -> Option<NumericView> {
        match self {
            Self::Bool(value) => Some(NumericView::Int(i64::from(*value))),
            Self::Integer(value) => Some(NumericView::Int(*value)),
            Self::Real(value) => Some(NumericView::Real(*value)),
            _ => None,
        }
    }
}

#[derive(Clone, Copy)]
enum NumericView {
    Int(i64),
    Real(f64),
}

fn compare_numbers(left: &Value, right: &Value) -> Ordering {
    match (left.numeric_view(), right.numeric_view()) {
        (Some(NumericView::Int(a)), Some(NumericView::Int(b))) => a.cmp(&b),
        (Some(NumericView::Real(a)), Some(NumericView::Real(b))) => {
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Some(NumericView::Int(a)), Some(NumericView::Real(b))) => compare_int_real(a, b),
        (Some(NumericView::Real(a)), Some(NumericView::Int(b))) => {
            compare_int_real(b, a).reverse()
        }
        _ => Ordering::Equal,
    }
}

/// Compares without rounding the integer through `f64`, as SQLite does.
fn compare_int_real(int: i64, real: f64) -> Ordering {
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    if real >= TWO_POW_63 {
        return Ordering::Less;
    }
    if real < -TWO_POW_63 {
        return Ordering::Greater;
    }
    // Integral and inside the i64 range, so the cast is exact.
    let whole = real.trunc();
    match int.cmp(&(whole as i64)) {
        Ordering::Equal => whole.partial_cmp(&real).unwrap_or(Ordering::Equal),
        other => other,
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "nil"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "'{value}'"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    /// Non-finite input maps to `Null`; use `Value::real` to detect it.
    fn from(value: f64) -> Self {
        Self::real(value).unwrap_or(Self::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::Value;
    use std::cmp::Ordering;

    #[test]
    fn null_sorts_before_numbers_and_numbers_before_text() {
        assert_eq!(Value::Null.sort_cmp(&Value::Integer(-5)), Ordering::Less);
        assert_eq!(
            Value::Real(1e9).sort_cmp(&Value::Text(String::new())),
            Ordering::Less
        );
    }

    #[test]
    fn integers_and_reals_compare_numerically() {
        assert_eq!(Value::Integer(2).sort_cmp(&Value::Real(2.5)), Ordering::Less);
        assert_eq!(Value::Real(3.0).sort_cmp(&Value::Integer(3)), Ordering::Equal);
        assert_eq!(Value::Bool(true).sort_cmp(&Value::Integer(1)), Ordering::Equal);
    }

    #[test]
    fn large_integers_compare_exactly_against_reals() {
        let big = Value::Integer(9_007_199_254_740_993);
        let two_pow_53 = Value::Real(9_007_199_254_740_992.0);
        assert_eq!(big.sort_cmp(&two_pow_53), Ordering::Greater);
        assert_eq!(two_pow_53.sort_cmp(&big), Ordering::Less);
        assert_eq!(
            Value::Integer(i64::MAX).sort_cmp(&Value::Real(9.3e18)),
            Ordering::Less
        );
        assert_eq!(
            Value::Integer(-3).sort_cmp(&Value::Real(-2.5)),
            Ordering::Less
        );
        assert_eq!(
            Value::Integer(-2).sort_cmp(&Value::Real(-2.5)),
            Ordering::Greater
        );
    }

    #[test]
    fn text_compares_bytewise() {
        assert_eq!(
            Value::from("Zed").sort_cmp(&Value::from("apple")),
            Ordering::Less
        );
    }

    #[test]
    fn non_finite_reals_are_rejected() {
        assert!(Value::real(f64::NAN).is_none());
        assert_eq!(Value::from(f64::INFINITY), Value::Null);
    }

    #[test]
    fn json_numbers_keep_integer_and_real_apart() {
        let integer = Value::from_json(&serde_json::json!(40)).unwrap();
        let real = Value::from_json(&serde_json::json!(40.5)).unwrap();
        assert_eq!(integer, Value::Integer(40));
        assert_eq!(real, Value::Real(40.5));
        assert!(Value::from_json(&serde_json::json!([1])).is_none());
    }
}
