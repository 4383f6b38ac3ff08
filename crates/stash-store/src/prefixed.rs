//! Prefix-bound view into an [`ObjectStore`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::object::{ListPage, ObjectStore, StoredObject, WriteCondition, validate_key};

/// A view that stores every key as `{prefix}/{key}`.
///
/// Several stashes can share one bucket by binding different prefixes.
/// Listings strip the prefix again so callers never see it. An empty prefix
/// makes the view transparent.
#[derive(Clone)]
pub struct PrefixedStore {
    inner: Arc<dyn ObjectStore>,
    prefix: String,
}

impl std::fmt::Debug for PrefixedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixedStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl PrefixedStore {
    /// Bind `prefix` over `store`. Surrounding `/` are trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] if the prefix contains null bytes.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl AsRef<str>) -> StoreResult<Self> {
        let prefix = prefix.as_ref().trim_matches('/');
        if !prefix.is_empty() {
            validate_key(prefix)?;
        }
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix}/")
        };
        Ok(Self {
            inner: store,
            prefix,
        })
    }

    /// The bound prefix, without the trailing separator.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.prefix.trim_end_matches('/')
    }

    fn full(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn strip(&self, key: String) -> StoreResult<String> {
        match key.strip_prefix(&self.prefix) {
            Some(rest) => Ok(rest.to_owned()),
            None => Err(StoreError::Internal(format!(
                "listed key {key} lies outside prefix {}",
                self.prefix
            ))),
        }
    }
}

#[async_trait]
impl ObjectStore for PrefixedStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        validate_key(key)?;
        self.inner.put(&self.full(key), value).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        validate_key(key)?;
        self.inner.get(&self.full(key)).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        validate_key(key)?;
        self.inner.delete(&self.full(key)).await
    }

    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<ListPage> {
        let start_after = start_after.map(|s| self.full(s));
        let page = self
            .inner
            .list_page(&self.full(prefix), start_after.as_deref(), limit)
            .await?;
        let keys = page
            .keys
            .into_iter()
            .map(|k| self.strip(k))
            .collect::<StoreResult<Vec<_>>>()?;
        let next = page.next.map(|n| self.strip(n)).transpose()?;
        Ok(ListPage { keys, next })
    }

    fn supports_conditional_writes(&self) -> bool {
        self.inner.supports_conditional_writes()
    }

    async fn put_if(
        &self,
        key: &str,
        value: Vec<u8>,
        condition: WriteCondition,
    ) -> StoreResult<()> {
        validate_key(key)?;
        self.inner.put_if(&self.full(key), value, condition).await
    }

    async fn delete_if(&self, key: &str, etag: &str) -> StoreResult<bool> {
        validate_key(key)?;
        self.inner.delete_if(&self.full(key), etag).await
    }
}
