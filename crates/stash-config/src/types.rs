//! Configuration struct definitions.
//!
//! Every section derives `Deserialize` with `#[serde(default)]`, so a file
//! only needs to name the fields it changes.

use std::path::PathBuf;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where objects live.
    pub store: StoreSection,
    /// Index tuning.
    pub index: IndexSection,
    /// Request concurrency.
    pub concurrency: ConcurrencySection,
    /// Per-call timeouts.
    pub timeouts: TimeoutsSection,
    /// Retry of transient store failures.
    pub retry: RetrySection,
    /// Log output.
    pub logging: LoggingSection,
    /// Declared entities.
    pub entities: Vec<EntitySection>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Object store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map; contents vanish on exit.
    #[default]
    Memory,
    /// One file per object under a local directory.
    Fs,
}

/// Object store location.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Backend kind.
    pub backend: StoreBackend,
    /// Bucket name; objects of the bucket share one namespace.
    pub bucket: String,
    /// Key prefix every object key is placed under.
    pub prefix: String,
    /// Region of a remote bucket.
    pub region: Option<String>,
    /// Endpoint URL. `file://` URLs locate the filesystem backend.
    pub root_url: Option<String>,
    /// Local directory of the filesystem backend.
    pub data_dir: Option<PathBuf>,
    /// Access credentials. Never serialised.
    pub credentials: Credentials,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            bucket: "stash".to_owned(),
            prefix: String::new(),
            region: None,
            root_url: None,
            data_dir: None,
            credentials: Credentials::default(),
        }
    }
}

impl std::fmt::Debug for StoreSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSection")
            .field("backend", &self.backend)
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("region", &self.region)
            .field("root_url", &self.root_url)
            .field("data_dir", &self.data_dir)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl Serialize for StoreSection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("StoreSection", 6)?;
        state.serialize_field("backend", &self.backend)?;
        state.serialize_field("bucket", &self.bucket)?;
        state.serialize_field("prefix", &self.prefix)?;
        state.serialize_field("region", &self.region)?;
        state.serialize_field("root_url", &self.root_url)?;
        state.serialize_field("data_dir", &self.data_dir)?;
        // credentials are intentionally omitted.
        state.end()
    }
}

/// Store access credentials.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Access key id.
    pub access_key_id: Option<String>,
    /// Secret access key.
    pub secret_access_key: Option<String>,
}

impl Credentials {
    /// Whether both halves of the key pair are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("has_access_key_id", &self.access_key_id.is_some())
            .field("has_secret_access_key", &self.secret_access_key.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// Numeric index tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSection {
    /// Numeric index strategy name.
    pub engine: String,
    /// Most ids per leaf object.
    pub fan_out: usize,
    /// Integer digits of integer columns.
    pub integer_digits: u8,
    /// Integer digits of float columns.
    pub float_integer_digits: u8,
    /// Fraction digits of float columns.
    pub fraction_digits: u8,
    /// Integer digits of date columns (epoch milliseconds).
    pub date_digits: u8,
    /// Most listing prefixes one range query may plan.
    pub max_list_calls: usize,
    /// Re-reads after a conditional write conflict.
    pub cas_retries: u32,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            engine: "basic".to_owned(),
            fan_out: 200,
            integer_digits: 19,
            float_integer_digits: 15,
            fraction_digits: 6,
            date_digits: 15,
            max_list_calls: 64,
            cas_retries: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Concurrency, timeouts, retry
// ---------------------------------------------------------------------------

/// Request concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencySection {
    /// Store calls in flight at once, across all operations.
    pub max_in_flight: usize,
}

impl Default for ConcurrencySection {
    fn default() -> Self {
        Self { max_in_flight: 32 }
    }
}

/// Per-call timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsSection {
    /// Timeout of a single store call in milliseconds.
    pub call_ms: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self { call_ms: 10_000 }
    }
}

/// Retry of transient store failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Total attempts per call, the first included.
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,
    /// Cap on any single delay in milliseconds.
    pub max_delay_ms: u64,
    /// Randomise delays (full jitter).
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 50,
            max_delay_ms: 2_000,
            jitter: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Level: trace, debug, info, warn or error.
    pub level: String,
    /// Format: pretty, compact, json or full.
    pub format: String,
    /// Per-module directives, e.g. `stash_core=debug`.
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// One `[[entities]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitySection {
    /// Entity name.
    pub name: String,
    /// Record lifetime in seconds.
    pub expires_in_secs: Option<u64>,
    /// Maintain `created_at` / `updated_at`.
    pub timestamps: bool,
    /// Declared columns.
    pub columns: Vec<ColumnSection>,
}

impl Default for EntitySection {
    fn default() -> Self {
        Self {
            name: String::new(),
            expires_in_secs: None,
            timestamps: true,
            columns: Vec::new(),
        }
    }
}

/// One `[[entities.columns]]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnSection {
    /// Column name.
    pub name: String,
    /// Type name: string, integer, float, boolean, date, json, array, or
    /// any other name for a custom type.
    #[serde(rename = "type")]
    pub ty: String,
    /// Maintain an index.
    pub index: bool,
    /// Enforce uniqueness (implies `index`).
    pub unique: bool,
    /// Value used when a record omits the column.
    pub default: Option<toml::Value>,
    /// Integer digits of the numeric index domain.
    pub integer_digits: Option<u8>,
    /// Fraction digits of the numeric index domain.
    pub fraction_digits: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_are_redacted() {
        let mut store = StoreSection::default();
        store.credentials.access_key_id = Some("AKIA-visible-id".to_owned());
        store.credentials.secret_access_key = Some("super-secret-value".to_owned());

        let debug_str = format!("{store:?}");
        assert!(!debug_str.contains("super-secret-value"));
        assert!(!debug_str.contains("AKIA-visible-id"));
        assert!(debug_str.contains("has_secret_access_key: true"));

        let json = serde_json::to_string(&store).unwrap();
        assert!(!json.contains("super-secret-value"));
        assert!(!json.contains("credentials"));
        assert!(store.credentials.is_complete());
    }

    #[test]
    fn test_entities_parse() {
        let config: Config = toml::from_str(
            r#"
            [[entities]]
            name = "users"
            expires_in_secs = 3600

            [[entities.columns]]
            name = "email"
            type = "string"
            unique = true

            [[entities.columns]]
            name = "score"
            type = "float"
            index = true
            default = 0.0
            fraction_digits = 2
        "#,
        )
        .unwrap();
        let users = &config.entities[0];
        assert!(users.timestamps);
        assert_eq!(users.expires_in_secs, Some(3600));
        assert_eq!(users.columns[1].ty, "float");
        assert_eq!(users.columns[1].default, Some(toml::Value::Float(0.0)));
        assert_eq!(users.columns[1].fraction_digits, Some(2));
    }
}
