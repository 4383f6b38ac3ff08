//! Error types surfaced by the Stash coordinator.

use stash_store::StoreError;
use thiserror::Error;

use crate::codec::CodecError;

/// Errors returned by [`Stash`](crate::Stash) operations.
///
/// Everything except [`StashError::StoreUnavailable`] and
/// [`StashError::Store`] is a caller-facing failure that retrying will not
/// fix. Transient store failures have already been retried by the store
/// layer by the time they surface here.
#[derive(Debug, Error)]
pub enum StashError {
    /// The caller lacks permission for a store operation.
    #[error("access denied: {0}")]
    Auth(String),

    /// Malformed query shape.
    #[error("invalid query: {0}")]
    Query(String),

    /// A unique column value already belongs to another record.
    #[error("unique key violation on {entity}.{column}: value {value} is owned by {owner}")]
    UniqueKeyViolation {
        /// Entity name.
        entity: String,
        /// Unique column name.
        column: String,
        /// The encoded contested value.
        value: String,
        /// Id of the record that owns the value.
        owner: String,
    },

    /// The referenced record does not exist (or has expired).
    #[error("record not found: {entity}/{id}")]
    NotFound {
        /// Entity name.
        entity: String,
        /// Record id.
        id: String,
    },

    /// A numeric value does not fit the column's encodable domain.
    #[error("value {value} is outside the indexable domain of column {column}")]
    OutOfDomain {
        /// Column name.
        column: String,
        /// The offending value, rendered.
        value: String,
    },

    /// Record data or schema does not satisfy its declaration.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The entity was never registered.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// A column value could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Transient store failures outlasted the retry budget.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// Any other store failure, including exhausted compare-and-swap retries.
    #[error("store error: {0}")]
    Store(#[source] StoreError),

    /// A stored object could not be (de)serialised.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<StoreError> for StashError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccessDenied(msg) => Self::Auth(msg),
            err @ StoreError::Exhausted { .. } => Self::StoreUnavailable(err),
            err => Self::Store(err),
        }
    }
}

impl From<serde_json::Error> for StashError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for Stash operations.
pub type StashResult<T> = Result<T, StashError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            StashError::from(StoreError::AccessDenied("no".into())),
            StashError::Auth(_)
        ));
        assert!(matches!(
            StashError::from(StoreError::Exhausted {
                attempts: 4,
                last: Box::new(StoreError::Timeout(Duration::from_secs(1))),
            }),
            StashError::StoreUnavailable(_)
        ));
        assert!(matches!(
            StashError::from(StoreError::Conflict { key: "k".into() }),
            StashError::Store(StoreError::Conflict { .. })
        ));
    }

    #[test]
    fn test_unique_violation_message() {
        let err = StashError::UniqueKeyViolation {
            entity: "users".into(),
            column: "email".into(),
            value: "x@x.com".into(),
            owner: "a".into(),
        };
        assert_eq!(
            err.to_string(),
            "unique key violation on users.email: value x@x.com is owned by a"
        );
    }
}
