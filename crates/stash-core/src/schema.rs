//! Entity and column descriptors.
//!
//! Schemas are plain data built once at startup and registered in a
//! [`SchemaRegistry`]. Nothing mutates them afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{ColumnCodec, builtin_codec};
use crate::error::{StashError, StashResult};
use crate::value::Value;

/// Maximum combined digit width of a numeric domain (fits in `u128`).
pub const MAX_DOMAIN_DIGITS: u8 = 38;

// ---------------------------------------------------------------------------
// Column types
// ---------------------------------------------------------------------------

/// Logical column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// UTF-8 text.
    String,
    /// 64-bit integer.
    Integer,
    /// 64-bit float.
    Float,
    /// Boolean.
    Boolean,
    /// UTC timestamp, range-indexed as epoch milliseconds.
    Date,
    /// Arbitrary JSON.
    Json,
    /// List of scalar, array or JSON-object values.
    Array,
    /// Application-defined type with its own codec.
    Custom(String),
}

impl ColumnType {
    /// Whether the type supports range queries when indexed.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float | Self::Date)
    }

    /// Parse the lowercase type names used in configuration. Unknown names
    /// become [`ColumnType::Custom`].
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "string" => Self::String,
            "integer" => Self::Integer,
            "float" => Self::Float,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "json" => Self::Json,
            "array" => Self::Array,
            other => Self::Custom(other.to_owned()),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Integer => f.write_str("integer"),
            Self::Float => f.write_str("float"),
            Self::Boolean => f.write_str("boolean"),
            Self::Date => f.write_str("date"),
            Self::Json => f.write_str("json"),
            Self::Array => f.write_str("array"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Numeric domain
// ---------------------------------------------------------------------------

/// Fixed-point range a numeric column can encode into index keys.
///
/// Values are scaled by `10^fraction_digits` and must then fit in
/// `integer_digits + fraction_digits` decimal digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NumericDomain {
    /// Digits before the decimal point.
    pub integer_digits: u8,
    /// Digits after the decimal point.
    pub fraction_digits: u8,
}

impl NumericDomain {
    /// Default for integer columns: every `i64`.
    pub const INTEGER: Self = Self {
        integer_digits: 19,
        fraction_digits: 0,
    };

    /// Default for float columns: 15 integer and 6 fractional digits.
    pub const FLOAT: Self = Self {
        integer_digits: 15,
        fraction_digits: 6,
    };

    /// Default for date columns: epoch milliseconds up to year ~33658.
    pub const DATE: Self = Self {
        integer_digits: 15,
        fraction_digits: 0,
    };

    /// Create a domain, checking that the width fits.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::Validation`] if the combined width is zero or
    /// exceeds [`MAX_DOMAIN_DIGITS`].
    pub fn new(integer_digits: u8, fraction_digits: u8) -> StashResult<Self> {
        let domain = Self {
            integer_digits,
            fraction_digits,
        };
        let width = u16::from(integer_digits).saturating_add(u16::from(fraction_digits));
        if width == 0 || width > u16::from(MAX_DOMAIN_DIGITS) {
            return Err(StashError::Validation(format!(
                "numeric domain {integer_digits}.{fraction_digits} must span 1..={MAX_DOMAIN_DIGITS} digits"
            )));
        }
        Ok(domain)
    }

    /// Total digit count `W` (sign excluded).
    #[must_use]
    pub fn width(&self) -> u8 {
        self.integer_digits.saturating_add(self.fraction_digits)
    }

    /// Default domain for a numeric column type.
    #[must_use]
    pub fn default_for(ty: &ColumnType) -> Option<Self> {
        match ty {
            ColumnType::Integer => Some(Self::INTEGER),
            ColumnType::Float => Some(Self::FLOAT),
            ColumnType::Date => Some(Self::DATE),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

/// Descriptor of one column.
#[derive(Clone)]
pub struct ColumnSchema {
    /// Column name (identifier).
    pub name: String,
    /// Logical type.
    pub ty: ColumnType,
    /// Maintain a secondary index (range for numeric types, equality otherwise).
    pub index: bool,
    /// Enforce value uniqueness across the entity. Implies `index`.
    pub unique: bool,
    /// Value applied when a saved record omits the column.
    pub default: Option<Value>,
    /// Encodable range for numeric columns. `None` uses the index defaults.
    pub domain: Option<NumericDomain>,
    /// Value serialisation.
    pub codec: Arc<dyn ColumnCodec>,
}

impl fmt::Debug for ColumnSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnSchema")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("index", &self.index)
            .field("unique", &self.unique)
            .field("default", &self.default)
            .field("domain", &self.domain)
            .field("codec", &self.codec.name())
            .finish()
    }
}

impl ColumnSchema {
    /// A plain, unindexed column using the built-in codec for `ty`.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        let codec = builtin_codec(&ty);
        Self {
            name: name.into(),
            ty,
            index: false,
            unique: false,
            default: None,
            domain: None,
            codec,
        }
    }

    /// Mark the column indexed.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    /// Mark the column unique (and therefore indexed).
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self.index = true;
        self
    }

    /// Set the default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Override the numeric domain.
    #[must_use]
    pub fn with_domain(mut self, domain: NumericDomain) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Attach a custom codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn ColumnCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Whether range queries are served by the numeric index.
    #[must_use]
    pub fn is_range_indexed(&self) -> bool {
        self.index && self.ty.is_numeric()
    }

    /// Whether equality lookups are served by the equality index.
    #[must_use]
    pub fn is_equality_indexed(&self) -> bool {
        self.index && !self.unique && !self.ty.is_numeric()
    }

    /// Coerce and type-check a value for this column.
    ///
    /// Integers widen to floats on float columns; nulls always pass.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::Validation`] on a type mismatch.
    pub fn coerce(&self, value: Value) -> StashResult<Value> {
        let ok = match (&self.ty, &value) {
            (_, Value::Null)
            | (ColumnType::String, Value::String(_))
            | (ColumnType::Integer, Value::Integer(_))
            | (ColumnType::Float, Value::Float(_))
            | (ColumnType::Boolean, Value::Bool(_))
            | (ColumnType::Date, Value::Date(_))
            | (ColumnType::Json, Value::Json(_))
            | (ColumnType::Array, Value::Array(_))
            | (ColumnType::Custom(_), _) => true,
            #[allow(clippy::cast_precision_loss)]
            (ColumnType::Float, Value::Integer(i)) => return Ok(Value::Float(*i as f64)),
            _ => false,
        };
        if ok {
            Ok(value)
        } else {
            Err(StashError::Validation(format!(
                "column {} expects {} but got {}",
                self.name,
                self.ty,
                value.kind()
            )))
        }
    }

    /// Convert JSON input into a value of this column's type.
    ///
    /// Dates accept RFC 3339 strings or epoch milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::Validation`] if the JSON has the wrong shape.
    pub fn value_from_json(&self, json: &serde_json::Value) -> StashResult<Value> {
        use serde_json::Value as J;

        let bad = || {
            StashError::Validation(format!(
                "column {} expects {} but got {json}",
                self.name, self.ty
            ))
        };
        let value = match (&self.ty, json) {
            (_, J::Null) => Value::Null,
            (ColumnType::String, J::String(s)) => Value::String(s.clone()),
            (ColumnType::Integer, J::Number(n)) => Value::Integer(n.as_i64().ok_or_else(bad)?),
            (ColumnType::Float, J::Number(n)) => Value::Float(n.as_f64().ok_or_else(bad)?),
            (ColumnType::Boolean, J::Bool(b)) => Value::Bool(*b),
            (ColumnType::Date, J::String(s)) => DateTime::parse_from_rfc3339(s)
                .map(|d| Value::Date(d.with_timezone(&Utc)))
                .map_err(|_| bad())?,
            (ColumnType::Date, J::Number(n)) => n
                .as_i64()
                .and_then(DateTime::from_timestamp_millis)
                .map(Value::Date)
                .ok_or_else(bad)?,
            (ColumnType::Array, J::Array(_)) => Value::from_json_inferred(json),
            (ColumnType::Json | ColumnType::Custom(_), other) => Value::Json(other.clone()),
            _ => return Err(bad()),
        };
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Descriptor of one record type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    /// Entity name (identifier); the first key segment of every object.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnSchema>,
    /// Records expire this long after their last save.
    pub expires_in: Option<Duration>,
    /// Maintain `created_at` / `updated_at`.
    pub timestamps: bool,
}

impl EntitySchema {
    /// An entity with no columns, no expiry and timestamps enabled.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            expires_in: None,
            timestamps: true,
        }
    }

    /// Append a column.
    #[must_use]
    pub fn column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the record lifetime.
    #[must_use]
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    /// Enable or disable timestamps.
    #[must_use]
    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    /// Look up a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column, failing with a query error if it is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::Query`] for an undeclared column.
    pub fn require_column(&self, name: &str) -> StashResult<&ColumnSchema> {
        self.get_column(name).ok_or_else(|| {
            StashError::Query(format!("entity {} has no column {name}", self.name))
        })
    }

    /// Apply defaults and type-check a full set of column values.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::Validation`] for undeclared columns or type
    /// mismatches.
    pub fn prepare(&self, mut values: BTreeMap<String, Value>) -> StashResult<BTreeMap<String, Value>> {
        if let Some(unknown) = values.keys().find(|k| self.get_column(k).is_none()) {
            return Err(StashError::Validation(format!(
                "entity {} has no column {unknown}",
                self.name
            )));
        }
        let mut prepared = BTreeMap::new();
        for column in &self.columns {
            let value = match values.remove(&column.name) {
                Some(v) if !v.is_null() => v,
                _ => column.default.clone().unwrap_or(Value::Null),
            };
            let value = column.coerce(value)?;
            if !value.is_null() {
                prepared.insert(column.name.clone(), value);
            }
        }
        Ok(prepared)
    }

    /// Check names, duplicates, domains and defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::Validation`] describing the first problem.
    pub fn validate(&self) -> StashResult<()> {
        validate_identifier("entity", &self.name)?;
        let mut seen = HashSet::new();
        for column in &self.columns {
            validate_identifier("column", &column.name)?;
            if !seen.insert(column.name.as_str()) {
                return Err(StashError::Validation(format!(
                    "entity {} declares column {} twice",
                    self.name, column.name
                )));
            }
            if let Some(domain) = column.domain {
                if !column.ty.is_numeric() {
                    return Err(StashError::Validation(format!(
                        "column {}.{} has a numeric domain but type {}",
                        self.name, column.name, column.ty
                    )));
                }
                NumericDomain::new(domain.integer_digits, domain.fraction_digits)?;
            }
            if let Some(default) = &column.default {
                let coerced = column.coerce(default.clone())?;
                column.codec.encode(&coerced)?;
            }
        }
        Ok(())
    }
}

/// Identifiers start with an ASCII letter or `_` and continue with ASCII
/// alphanumerics, `_` or `-`.
fn validate_identifier(what: &str, name: &str) -> StashResult<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StashError::Validation(format!(
            "invalid {what} name {name:?}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Lookup table of registered entities.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: HashMap<String, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register an entity.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::Validation`] if the schema is invalid or the
    /// name is already taken.
    pub fn register(&mut self, schema: EntitySchema) -> StashResult<()> {
        schema.validate()?;
        if self.entities.contains_key(&schema.name) {
            return Err(StashError::Validation(format!(
                "entity {} is already registered",
                schema.name
            )));
        }
        self.entities.insert(schema.name.clone(), Arc::new(schema));
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn with(mut self, schema: EntitySchema) -> StashResult<Self> {
        self.register(schema)?;
        Ok(self)
    }

    /// Look up an entity.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::UnknownEntity`] if it was never registered.
    pub fn get(&self, name: &str) -> StashResult<Arc<EntitySchema>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| StashError::UnknownEntity(name.to_owned()))
    }

    /// Registered entity names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> EntitySchema {
        EntitySchema::new("users")
            .column(ColumnSchema::new("email", ColumnType::String).unique())
            .column(ColumnSchema::new("score", ColumnType::Float).indexed())
            .column(ColumnSchema::new("role", ColumnType::String).with_default("member"))
    }

    #[test]
    fn test_registry_lookup() {
        let registry = SchemaRegistry::new().with(users()).unwrap();
        assert_eq!(registry.get("users").unwrap().columns.len(), 3);
        assert!(matches!(
            registry.get("orders"),
            Err(StashError::UnknownEntity(name)) if name == "orders"
        ));
        assert_eq!(registry.names(), vec!["users"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = SchemaRegistry::new();
        registry.register(users()).unwrap();
        assert!(registry.register(users()).is_err());
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(EntitySchema::new(".records").validate().is_err());
        assert!(EntitySchema::new("a/b").validate().is_err());
        assert!(
            EntitySchema::new("ok")
                .column(ColumnSchema::new("bad name", ColumnType::String))
                .validate()
                .is_err()
        );
        assert!(
            EntitySchema::new("ok")
                .column(ColumnSchema::new("x", ColumnType::String))
                .column(ColumnSchema::new("x", ColumnType::Integer))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_domain_bounds() {
        assert!(NumericDomain::new(0, 0).is_err());
        assert!(NumericDomain::new(30, 9).is_err());
        assert_eq!(NumericDomain::new(30, 8).unwrap().width(), 38);
        assert!(
            EntitySchema::new("ok")
                .column(
                    ColumnSchema::new("name", ColumnType::String)
                        .with_domain(NumericDomain::INTEGER)
                )
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_prepare_applies_defaults_and_coerces() {
        let schema = users();
        let mut values = BTreeMap::new();
        values.insert("email".to_owned(), Value::from("a@x.com"));
        values.insert("score".to_owned(), Value::Integer(10));
        let prepared = schema.prepare(values).unwrap();
        assert_eq!(prepared["score"], Value::Float(10.0));
        assert_eq!(prepared["role"], Value::from("member"));
    }

    #[test]
    fn test_prepare_rejects_unknown_and_mistyped() {
        let schema = users();
        let mut values = BTreeMap::new();
        values.insert("nickname".to_owned(), Value::from("x"));
        assert!(matches!(schema.prepare(values), Err(StashError::Validation(_))));

        let mut values = BTreeMap::new();
        values.insert("score".to_owned(), Value::from("high"));
        assert!(matches!(schema.prepare(values), Err(StashError::Validation(_))));
    }

    #[test]
    fn test_unique_implies_index() {
        let col = ColumnSchema::new("email", ColumnType::String).unique();
        assert!(col.index);
        assert!(!col.is_equality_indexed());
        assert!(ColumnSchema::new("tag", ColumnType::String).indexed().is_equality_indexed());
        assert!(ColumnSchema::new("at", ColumnType::Date).indexed().is_range_indexed());
    }

    #[test]
    fn test_value_from_json() {
        let date = ColumnSchema::new("at", ColumnType::Date);
        let v = date.value_from_json(&serde_json::json!(1_700_000_000_000_i64)).unwrap();
        assert_eq!(v.as_number(), Some(crate::value::Number::Int(1_700_000_000_000)));
        assert!(date.value_from_json(&serde_json::json!("2024-01-01T00:00:00Z")).is_ok());
        assert!(date.value_from_json(&serde_json::json!(true)).is_err());

        let int = ColumnSchema::new("n", ColumnType::Integer);
        assert!(int.value_from_json(&serde_json::json!(1.5)).is_err());
        assert_eq!(int.value_from_json(&serde_json::json!(null)).unwrap(), Value::Null);
    }
}
