//! Records and their stored form.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{StashError, StashResult};
use crate::schema::EntitySchema;
use crate::value::{Number, Value};

/// Opaque record identifier, unique within its entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// A fresh random (UUID v4) id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a caller-chosen id.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::Validation`] if the id is empty or contains
    /// control characters.
    pub fn new(id: impl Into<String>) -> StashResult<Self> {
        let id = id.into();
        if id.is_empty() || id.chars().any(char::is_control) {
            return Err(StashError::Validation(format!("invalid record id {id:?}")));
        }
        Ok(Self(id))
    }

    /// Rebuild an id read back from an index entry.
    pub(crate) fn from_index(id: String) -> Self {
        Self(id)
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Input to [`Stash::save`](crate::Stash::save).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordData {
    /// Existing id to overwrite; `None` assigns a fresh one.
    pub id: Option<RecordId>,
    /// Column values. Omitted columns take their defaults.
    pub values: BTreeMap<String, Value>,
}

impl RecordData {
    /// Empty data with no id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Target an existing id.
    #[must_use]
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set one column value.
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// Parse a JSON object against a schema. An `"id"` member selects the
    /// record to overwrite.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::Validation`] for non-objects, unknown columns
    /// or mistyped values.
    pub fn from_json(schema: &EntitySchema, json: &serde_json::Value) -> StashResult<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| StashError::Validation("record data must be a JSON object".into()))?;
        let mut data = Self::new();
        for (key, value) in object {
            if key == "id" {
                let id = value
                    .as_str()
                    .ok_or_else(|| StashError::Validation("id must be a string".into()))?;
                data.id = Some(RecordId::new(id)?);
                continue;
            }
            let column = schema.get_column(key).ok_or_else(|| {
                StashError::Validation(format!("entity {} has no column {key}", schema.name))
            })?;
            data.values.insert(key.clone(), column.value_from_json(value)?);
        }
        Ok(data)
    }
}

/// A persisted entity instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Record id.
    pub id: RecordId,
    /// Owning entity.
    pub entity: String,
    /// Non-null column values.
    pub values: BTreeMap<String, Value>,
    /// First save time, when the entity keeps timestamps.
    pub created_at: Option<DateTime<Utc>>,
    /// Last save time, when the entity keeps timestamps.
    pub updated_at: Option<DateTime<Utc>>,
    /// Time after which the record reads as absent.
    pub expires_at: Option<DateTime<Utc>>,
    /// Matched numeric values per queried column, filled by `find` on request.
    pub scores: BTreeMap<String, Number>,
}

impl Record {
    /// A column value, `Null` when unset.
    #[must_use]
    pub fn get(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&Value::Null)
    }

    /// Whether the record has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// JSON rendering for output.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        object.insert("id".into(), self.id.as_str().into());
        for (column, value) in &self.values {
            object.insert(column.clone(), value.to_json());
        }
        let stamp = |d: &DateTime<Utc>| d.to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Some(d) = &self.created_at {
            object.insert("created_at".into(), stamp(d).into());
        }
        if let Some(d) = &self.updated_at {
            object.insert("updated_at".into(), stamp(d).into());
        }
        if let Some(d) = &self.expires_at {
            object.insert("expires_at".into(), stamp(d).into());
        }
        if !self.scores.is_empty() {
            let scores = self
                .scores
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect();
            object.insert("scores".into(), serde_json::Value::Object(scores));
        }
        serde_json::Value::Object(object)
    }

    /// Encode into the stored object body.
    ///
    /// # Errors
    ///
    /// Returns a codec or serialisation error.
    pub(crate) fn to_stored(&self, schema: &EntitySchema) -> StashResult<Vec<u8>> {
        let mut fields = BTreeMap::new();
        for (name, value) in &self.values {
            let column = schema.get_column(name).ok_or_else(|| {
                StashError::Validation(format!("entity {} has no column {name}", schema.name))
            })?;
            fields.insert(name.clone(), column.codec.encode(value)?);
        }
        let stored = StoredRecord {
            id: self.id.clone(),
            fields,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
        };
        Ok(serde_json::to_vec(&stored)?)
    }

    /// Decode a stored object body. Fields no longer declared are dropped.
    ///
    /// # Errors
    ///
    /// Returns a codec or serialisation error.
    pub(crate) fn from_stored(schema: &EntitySchema, bytes: &[u8]) -> StashResult<Self> {
        let stored: StoredRecord = serde_json::from_slice(bytes)?;
        let mut values = BTreeMap::new();
        for (name, raw) in stored.fields {
            match schema.get_column(&name) {
                Some(column) => {
                    values.insert(name, column.codec.decode(&raw)?);
                },
                None => debug!(entity = %schema.name, column = %name, "dropping undeclared stored field"),
            }
        }
        Ok(Self {
            id: stored.id,
            entity: schema.name.clone(),
            values,
            created_at: stored.created_at,
            updated_at: stored.updated_at,
            expires_at: stored.expires_at,
            scores: BTreeMap::new(),
        })
    }
}

/// On-store JSON layout of a record object.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    id: RecordId,
    fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}
