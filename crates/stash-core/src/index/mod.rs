//! Secondary indexes.
//!
//! Numeric columns are served by a pluggable [`NumericIndex`]; the built-in
//! engine is the digit-bucketed [`BucketIndex`]. Non-numeric indexed columns
//! use an [`EqualityIndex`] and unique columns a [`UniqueIndex`].

mod bucket;
mod cas;
mod encoding;
mod equality;
mod leaf;
mod planner;
mod unique;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{StashError, StashResult};
use crate::query::NumericRange;
use crate::record::RecordId;
use crate::schema::{ColumnSchema, ColumnType, NumericDomain};
use crate::value::Number;

pub use bucket::BucketIndex;
pub use equality::EqualityIndex;
pub use unique::{Claim, UniqueIndex};

/// Available numeric index strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexingEngine {
    /// Digit-bucketed leaves, one object per full-depth canonical path.
    #[default]
    Basic,
}

impl IndexingEngine {
    /// Configuration name of the engine.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
        }
    }
}

impl fmt::Display for IndexingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexingEngine {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            other => Err(StashError::Validation(format!(
                "unknown indexing engine {other:?}"
            ))),
        }
    }
}

/// Tuning knobs shared by all indexes of a store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSettings {
    /// Most ids held by one leaf object.
    pub fan_out: usize,
    /// Most prefix listings a single range query may plan.
    pub max_list_calls: usize,
    /// Re-reads after a conditional write conflict before giving up.
    pub cas_retries: u32,
    /// Concurrent listing and fetch calls per query.
    pub max_in_flight: usize,
    /// Domain of integer columns without their own.
    pub integer_domain: NumericDomain,
    /// Domain of float columns without their own.
    pub float_domain: NumericDomain,
    /// Domain of date columns without their own.
    pub date_domain: NumericDomain,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            fan_out: 200,
            max_list_calls: 64,
            cas_retries: 5,
            max_in_flight: 16,
            integer_domain: NumericDomain::INTEGER,
            float_domain: NumericDomain::FLOAT,
            date_domain: NumericDomain::DATE,
        }
    }
}

impl IndexSettings {
    /// Domain used to encode a numeric column, `None` for other types.
    #[must_use]
    pub fn domain_for(&self, column: &ColumnSchema) -> Option<NumericDomain> {
        let fallback = match column.ty {
            ColumnType::Integer => self.integer_domain,
            ColumnType::Float => self.float_domain,
            ColumnType::Date => self.date_domain,
            _ => return None,
        };
        Some(column.domain.unwrap_or(fallback))
    }
}

/// The numeric column an index operation addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedColumn {
    /// Entity name.
    pub entity: String,
    /// Column name.
    pub column: String,
    /// Encodable domain of the column.
    pub domain: NumericDomain,
}

impl IndexedColumn {
    /// Build the address of a numeric column.
    #[must_use]
    pub fn new(entity: impl Into<String>, column: impl Into<String>, domain: NumericDomain) -> Self {
        Self {
            entity: entity.into(),
            column: column.into(),
            domain,
        }
    }

    /// Check that `value` can be indexed under this column's domain.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::OutOfDomain`] otherwise.
    pub fn check(&self, value: Number) -> StashResult<()> {
        encoding::encode(self.domain, value)
            .map(|_| ())
            .map_err(|_| StashError::OutOfDomain {
                column: self.column.clone(),
                value: value.to_string(),
            })
    }
}

/// One id returned by a range query, with the value that matched.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeHit {
    /// Record id.
    pub id: RecordId,
    /// Indexed value (exact when it was stored, quantised otherwise).
    pub value: Number,
}

/// A numeric range index strategy.
///
/// Implementations must tolerate concurrent callers and eventually
/// consistent listings. Results may miss an insert that is still in flight.
#[async_trait]
pub trait NumericIndex: Send + Sync {
    /// Which strategy this is.
    fn engine(&self) -> IndexingEngine;

    /// Add `id` with `value`. Returns whether anything was written.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::OutOfDomain`] if `value` cannot be encoded, or
    /// a store error.
    async fn insert(&self, column: &IndexedColumn, id: &RecordId, value: Number) -> StashResult<bool>;

    /// Remove `id` previously inserted with `value`. Returns whether it was
    /// present; removing an absent id is not an error.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    async fn remove(&self, column: &IndexedColumn, id: &RecordId, value: Number) -> StashResult<bool>;

    /// Every id whose value lies in `range`, ordered by value then id.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::Cancelled`] once `cancel` fires, or a store
    /// error.
    async fn query_range(
        &self,
        column: &IndexedColumn,
        range: &NumericRange,
        cancel: &CancellationToken,
    ) -> StashResult<Vec<RangeHit>>;
}
