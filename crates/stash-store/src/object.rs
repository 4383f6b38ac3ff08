//! Object store trait and shared types.
//!
//! The [`ObjectStore`] trait models a flat, remote key space that offers
//! point `get`/`put`/`delete` plus prefix listing, and nothing else: no
//! transactions and no range reads. Listing may be paginated and is only
//! eventually consistent in real backends.
//!
//! Backends that expose optimistic concurrency (entity tags) opt in through
//! [`ObjectStore::supports_conditional_writes`] and implement
//! [`ObjectStore::put_if`] / [`ObjectStore::delete_if`].

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};

/// Default page size used by [`ObjectStore::list`].
pub const DEFAULT_LIST_PAGE: usize = 1000;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate that a key is safe for storage.
///
/// Keys must be non-empty, must not contain the null byte, and must not
/// start or end with the `/` separator.
///
/// # Errors
///
/// Returns [`StoreError::InvalidKey`] describing the first violation.
pub fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("key must not be empty".into()));
    }
    if key.contains('\0') {
        return Err(StoreError::InvalidKey(
            "key must not contain null bytes".into(),
        ));
    }
    if key.starts_with('/') || key.ends_with('/') {
        return Err(StoreError::InvalidKey(format!(
            "key must not start or end with '/': {key}"
        )));
    }
    Ok(())
}

/// Validate a listing prefix. The empty prefix lists everything.
pub(crate) fn validate_prefix(prefix: &str) -> StoreResult<()> {
    if prefix.contains('\0') {
        return Err(StoreError::InvalidKey(
            "prefix must not contain null bytes".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An object body together with its entity tag, if the backend has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// The raw object bytes.
    pub data: Vec<u8>,
    /// Opaque version tag usable with [`WriteCondition::IfMatch`].
    pub etag: Option<String>,
}

impl StoredObject {
    /// An object without a version tag.
    #[must_use]
    pub fn untagged(data: Vec<u8>) -> Self {
        Self { data, etag: None }
    }
}

/// Precondition for [`ObjectStore::put_if`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Succeed only if no object exists under the key.
    IfAbsent,
    /// Succeed only if the current object carries this entity tag.
    IfMatch(String),
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Keys in ascending order.
    pub keys: Vec<String>,
    /// Continuation marker: pass as `start_after` to fetch the next page.
    pub next: Option<String>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Flat object store capability.
///
/// All keys share one namespace and use `/` as a conventional separator.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, replacing any existing one.
    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Read an object. Returns `None` if the key does not exist.
    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>>;

    /// Delete an object.
    ///
    /// Returns `true` if the key existed and was deleted.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// List up to `limit` keys starting with `prefix`, strictly after
    /// `start_after` when given, in ascending order.
    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<ListPage>;

    /// List every key starting with `prefix` by draining all pages.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .list_page(prefix, cursor.as_deref(), DEFAULT_LIST_PAGE)
                .await?;
            keys.extend(page.keys);
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(keys)
    }

    /// Whether [`put_if`](Self::put_if) and [`delete_if`](Self::delete_if)
    /// are implemented.
    fn supports_conditional_writes(&self) -> bool {
        false
    }

    /// Write an object only if `condition` holds.
    ///
    /// Fails with [`StoreError::Conflict`] when the precondition does not
    /// hold.
    async fn put_if(
        &self,
        key: &str,
        value: Vec<u8>,
        condition: WriteCondition,
    ) -> StoreResult<()> {
        let _ = (key, value, condition);
        Err(StoreError::Unsupported)
    }

    /// Delete an object only if it still carries `etag`.
    ///
    /// Returns `false` if the key was already absent; fails with
    /// [`StoreError::Conflict`] when a different version is present.
    async fn delete_if(&self, key: &str, etag: &str) -> StoreResult<bool> {
        let _ = (key, etag);
        Err(StoreError::Unsupported)
    }
}
