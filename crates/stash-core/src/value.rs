//! Typed column values.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

/// `2^63` as an `f64`, the first float above every `i64`.
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// A numeric value as seen by the range index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    /// A 64-bit integer.
    Int(i64),
    /// A 64-bit float.
    Float(f64),
}

impl Number {
    /// Exact total comparison across both variants.
    ///
    /// Integers and floats are compared mathematically, without first
    /// converting the integer to a (possibly rounded) float. NaN sorts above
    /// every other value.
    #[must_use]
    pub fn cmp_total(&self, other: &Self) -> Ordering {
        match (*self, *other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(&b),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(&b).unwrap_or_else(|| {
                // At least one side is NaN.
                a.is_nan().cmp(&b.is_nan())
            }),
            (Self::Int(a), Self::Float(b)) => cmp_int_float(a, b),
            (Self::Float(a), Self::Int(b)) => cmp_int_float(b, a).reverse(),
        }
    }

    /// Lossy conversion to `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    /// Whether the value is neither infinite nor NaN.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        match *self {
            Self::Int(_) => true,
            Self::Float(f) => f.is_finite(),
        }
    }

    /// Whether the value is negative (strictly below zero).
    #[must_use]
    pub fn is_negative(&self) -> bool {
        match *self {
            Self::Int(i) => i < 0,
            Self::Float(f) => f < 0.0,
        }
    }

    /// JSON rendering. Non-finite floats become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match *self {
            Self::Int(i) => serde_json::Value::from(i),
            Self::Float(f) => serde_json::Number::from_f64(f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn cmp_int_float(i: i64, f: f64) -> Ordering {
    if f.is_nan() || f >= TWO_POW_63 {
        return Ordering::Less;
    }
    if f < -TWO_POW_63 {
        return Ordering::Greater;
    }
    let floor = f.floor();
    // Exact: floor lies in [-2^63, 2^63).
    let whole = floor as i64;
    match i.cmp(&whole) {
        Ordering::Equal if f > floor => Ordering::Less,
        other => other,
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<i64> for Number {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Number {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// A typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent or explicitly null.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Integer(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// UTC timestamp.
    Date(DateTime<Utc>),
    /// Arbitrary JSON document.
    Json(serde_json::Value),
    /// Ordered list of values.
    Array(Vec<Value>),
}

impl Value {
    /// Whether this is [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The numeric view used by the range index. Dates map to epoch
    /// milliseconds.
    #[must_use]
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Self::Integer(i) => Some(Number::Int(*i)),
            Self::Float(f) => Some(Number::Float(*f)),
            Self::Date(d) => Some(Number::Int(d.timestamp_millis())),
            _ => None,
        }
    }

    /// Short name of the variant, for error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Json(_) => "json",
            Self::Array(_) => "array",
        }
    }

    /// JSON rendering for output. Dates become RFC 3339 strings.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Integer(i) => Number::Int(*i).to_json(),
            Self::Float(f) => Number::Float(*f).to_json(),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Date(d) => {
                serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            },
            Self::Json(j) => j.clone(),
            Self::Array(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    /// Interpret untyped JSON structurally: whole numbers become integers,
    /// other numbers floats, objects stay JSON.
    #[must_use]
    pub fn from_json_inferred(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => n.as_f64().map_or(Self::Null, Self::Float),
            },
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_json_inferred).collect())
            },
            serde_json::Value::Object(_) => Self::Json(json.clone()),
        }
    }

    /// Ordering used by `find` sorting: nulls first, then booleans, numbers
    /// (dates included), strings and finally structured values.
    #[must_use]
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Integer(_) | Value::Float(_) | Value::Date(_) => 2,
                Value::String(_) => 3,
                Value::Json(_) | Value::Array(_) => 4,
            }
        }

        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x.cmp_total(&y),
                _ => rank(a)
                    .cmp(&rank(b))
                    .then_with(|| a.to_json().to_string().cmp(&b.to_json().to_string())),
            },
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Date(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmp_total_mixed() {
        assert_eq!(Number::Int(3).cmp_total(&Number::Float(3.0)), Ordering::Equal);
        assert_eq!(Number::Int(3).cmp_total(&Number::Float(3.5)), Ordering::Less);
        assert_eq!(Number::Int(-3).cmp_total(&Number::Float(-3.5)), Ordering::Greater);
        assert_eq!(Number::Float(2.5).cmp_total(&Number::Int(2)), Ordering::Greater);
    }

    #[test]
    fn test_cmp_total_large_integers() {
        // i64::MAX rounds to 2^63 as a float; the exact comparison must not.
        assert_eq!(
            Number::Int(i64::MAX).cmp_total(&Number::Float(TWO_POW_63)),
            Ordering::Less
        );
        assert_eq!(
            Number::Int(i64::MIN).cmp_total(&Number::Float(-TWO_POW_63)),
            Ordering::Equal
        );
        assert_eq!(
            Number::Int(i64::MIN).cmp_total(&Number::Float(f64::NEG_INFINITY)),
            Ordering::Greater
        );
        assert_eq!(
            Number::Int(9_007_199_254_740_993).cmp_total(&Number::Float(9_007_199_254_740_992.0)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_cmp_total_nan_sorts_last() {
        assert_eq!(Number::Float(f64::NAN).cmp_total(&Number::Float(1.0)), Ordering::Greater);
        assert_eq!(Number::Int(1).cmp_total(&Number::Float(f64::NAN)), Ordering::Less);
    }

    #[test]
    fn test_date_as_number_is_epoch_millis() {
        let d = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(Value::Date(d).as_number(), Some(Number::Int(1_700_000_000_123)));
    }

    #[test]
    fn test_sort_cmp_nulls_first() {
        let mut values = vec![
            Value::from("b"),
            Value::Integer(2),
            Value::Null,
            Value::Float(1.5),
            Value::from("a"),
        ];
        values.sort_by(Value::sort_cmp);
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Float(1.5),
                Value::Integer(2),
                Value::from("a"),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn test_inferred_json() {
        let json = serde_json::json!([1, 2.5, "x", null, {"k": true}]);
        assert_eq!(
            Value::from_json_inferred(&json),
            Value::Array(vec![
                Value::Integer(1),
                Value::Float(2.5),
                Value::from("x"),
                Value::Null,
                Value::Json(serde_json::json!({"k": true})),
            ])
        );
    }
}
