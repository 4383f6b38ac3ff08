//! Column codecs: value to string serialisation per column type.
//!
//! Every codec obeys the round-trip law `decode(encode(v)) == v` for the
//! values it accepts. Encoded strings are what records store on disk and
//! what equality and unique index keys are derived from.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::schema::ColumnType;
use crate::value::Value;

/// Errors raised by a [`ColumnCodec`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value's variant is not handled by this codec.
    #[error("{codec} codec cannot encode a {found} value")]
    TypeMismatch {
        /// Codec name.
        codec: String,
        /// Variant of the rejected value.
        found: &'static str,
    },

    /// The value has the right variant but cannot be represented.
    #[error("{codec} codec rejected value: {reason}")]
    Unsupported {
        /// Codec name.
        codec: String,
        /// What was wrong.
        reason: String,
    },

    /// The stored string is not something this codec produced.
    #[error("{codec} codec cannot decode {input:?}: {reason}")]
    Malformed {
        /// Codec name.
        codec: String,
        /// The raw input.
        input: String,
        /// Parser message.
        reason: String,
    },
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Serialisation capability for one logical column type.
pub trait ColumnCodec: Send + Sync {
    /// Short identifier used in error messages.
    fn name(&self) -> &str;

    /// Render a value as a string.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the value is not representable.
    fn encode(&self, value: &Value) -> CodecResult<String>;

    /// Parse a string produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] on unparseable input.
    fn decode(&self, raw: &str) -> CodecResult<Value>;
}

impl std::fmt::Debug for dyn ColumnCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ColumnCodec({})", self.name())
    }
}

/// The built-in codec for a column type.
///
/// Custom columns default to [`JsonCodec`] until a dedicated codec is
/// attached to the column.
#[must_use]
pub fn builtin_codec(ty: &ColumnType) -> Arc<dyn ColumnCodec> {
    match ty {
        ColumnType::String => Arc::new(StringCodec),
        ColumnType::Integer => Arc::new(IntegerCodec),
        ColumnType::Float => Arc::new(FloatCodec),
        ColumnType::Boolean => Arc::new(BooleanCodec),
        ColumnType::Date => Arc::new(DateCodec),
        ColumnType::Json | ColumnType::Custom(_) => Arc::new(JsonCodec),
        ColumnType::Array => Arc::new(ArrayCodec),
    }
}

fn mismatch(codec: &str, value: &Value) -> CodecError {
    CodecError::TypeMismatch {
        codec: codec.to_owned(),
        found: value.kind(),
    }
}

fn malformed(codec: &str, input: &str, reason: impl ToString) -> CodecError {
    CodecError::Malformed {
        codec: codec.to_owned(),
        input: input.to_owned(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

/// Identity codec for strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl ColumnCodec for StringCodec {
    fn name(&self) -> &str {
        "string"
    }

    fn encode(&self, value: &Value) -> CodecResult<String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn decode(&self, raw: &str) -> CodecResult<Value> {
        Ok(Value::String(raw.to_owned()))
    }
}

/// Decimal rendering of `i64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerCodec;

impl ColumnCodec for IntegerCodec {
    fn name(&self) -> &str {
        "integer"
    }

    fn encode(&self, value: &Value) -> CodecResult<String> {
        match value {
            Value::Integer(i) => Ok(i.to_string()),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn decode(&self, raw: &str) -> CodecResult<Value> {
        raw.parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| malformed(self.name(), raw, e))
    }
}

/// Shortest round-tripping rendering of finite `f64`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatCodec;

impl ColumnCodec for FloatCodec {
    fn name(&self) -> &str {
        "float"
    }

    fn encode(&self, value: &Value) -> CodecResult<String> {
        match value {
            Value::Float(f) if f.is_finite() => Ok(f.to_string()),
            Value::Float(f) => Err(CodecError::Unsupported {
                codec: self.name().to_owned(),
                reason: format!("non-finite float {f}"),
            }),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn decode(&self, raw: &str) -> CodecResult<Value> {
        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(Value::Float(f)),
            Ok(_) => Err(malformed(self.name(), raw, "non-finite float")),
            Err(e) => Err(malformed(self.name(), raw, e)),
        }
    }
}

/// `true` / `false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanCodec;

impl ColumnCodec for BooleanCodec {
    fn name(&self) -> &str {
        "boolean"
    }

    fn encode(&self, value: &Value) -> CodecResult<String> {
        match value {
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn decode(&self, raw: &str) -> CodecResult<Value> {
        raw.parse::<bool>()
            .map(Value::Bool)
            .map_err(|e| malformed(self.name(), raw, e))
    }
}

/// RFC 3339 in UTC with as many fractional digits as needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateCodec;

impl ColumnCodec for DateCodec {
    fn name(&self) -> &str {
        "date"
    }

    fn encode(&self, value: &Value) -> CodecResult<String> {
        match value {
            Value::Date(d) => Ok(d.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn decode(&self, raw: &str) -> CodecResult<Value> {
        DateTime::parse_from_rfc3339(raw)
            .map(|d| Value::Date(d.with_timezone(&Utc)))
            .map_err(|e| malformed(self.name(), raw, e))
    }
}

// ---------------------------------------------------------------------------
// Structured
// ---------------------------------------------------------------------------

/// Compact JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ColumnCodec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn encode(&self, value: &Value) -> CodecResult<String> {
        match value {
            Value::Json(j) => Ok(j.to_string()),
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn decode(&self, raw: &str) -> CodecResult<Value> {
        serde_json::from_str(raw)
            .map(Value::Json)
            .map_err(|e| malformed(self.name(), raw, e))
    }
}

/// JSON array text. Elements must survive structural re-inference, so
/// dates, non-object JSON and non-finite floats are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayCodec;

impl ArrayCodec {
    fn check(&self, value: &Value) -> CodecResult<()> {
        let reject = |reason: String| CodecError::Unsupported {
            codec: self.name().to_owned(),
            reason,
        };
        match value {
            Value::Null | Value::Bool(_) | Value::Integer(_) | Value::String(_) => Ok(()),
            Value::Float(f) if f.is_finite() => Ok(()),
            Value::Float(f) => Err(reject(format!("non-finite element {f}"))),
            Value::Json(serde_json::Value::Object(_)) => Ok(()),
            Value::Json(_) => Err(reject("json elements must be objects".into())),
            Value::Date(_) => Err(reject("date elements are not supported".into())),
            Value::Array(items) => items.iter().try_for_each(|v| self.check(v)),
        }
    }
}

impl ColumnCodec for ArrayCodec {
    fn name(&self) -> &str {
        "array"
    }

    fn encode(&self, value: &Value) -> CodecResult<String> {
        match value {
            Value::Array(_) => {
                self.check(value)?;
                Ok(value.to_json().to_string())
            },
            other => Err(mismatch(self.name(), other)),
        }
    }

    fn decode(&self, raw: &str) -> CodecResult<Value> {
        let json: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| malformed(self.name(), raw, e))?;
        if !json.is_array() {
            return Err(malformed(self.name(), raw, "not a JSON array"));
        }
        Ok(Value::from_json_inferred(&json))
    }
}
