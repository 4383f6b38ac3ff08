//! Object store error types.

use std::time::Duration;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The caller is not permitted to perform the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The key is malformed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A conditional write lost against a concurrent writer.
    #[error("precondition failed for key {key}")]
    Conflict {
        /// The contended key.
        key: String,
    },

    /// The backend does not implement conditional writes.
    #[error("conditional writes are not supported by this store")]
    Unsupported,

    /// A single call exceeded its deadline.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The backend asked the caller to slow down.
    #[error("throttled: {0}")]
    Throttled(String),

    /// The backend is temporarily unavailable.
    #[error("temporarily unavailable: {0}")]
    Unavailable(String),

    /// Transient failures persisted past the retry budget.
    #[error("store unavailable after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last transient error seen.
        last: Box<StoreError>,
    },

    /// Local I/O failure (filesystem backend).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure.
    #[error("storage error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether the failure is worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Throttled(_) | Self::Unavailable(_)
        )
    }
}

/// Result type for object store operations.
pub type StoreResult<T> = Result<T, StoreError>;
