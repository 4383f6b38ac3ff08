//! In-memory object store for tests and ephemeral data.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::object::{
    ListPage, ObjectStore, StoredObject, WriteCondition, validate_key, validate_prefix,
};

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Entry>,
    next_version: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    version: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.next_version = self.next_version.saturating_add(1);
        self.next_version
    }

    fn etag_of(&self, key: &str) -> Option<String> {
        self.objects.get(key).map(|e| e.version.to_string())
    }
}

/// In-memory object store.
///
/// Keys live in an ordered map so listings come back sorted. Every write
/// assigns a fresh version which doubles as the entity tag, so conditional
/// writes behave like a real optimistic-concurrency backend.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    inner: RwLock<Inner>,
}

impl MemoryObjectStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Internal`] if the lock is poisoned.
    pub fn len(&self) -> StoreResult<usize> {
        let inner = self
            .inner
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(inner.objects.len())
    }

    /// Whether the store holds no objects.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Internal`] if the lock is poisoned.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        validate_key(key)?;
        let mut inner = self
            .inner
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let version = inner.bump();
        inner.objects.insert(
            key.to_owned(),
            Entry {
                data: value,
                version,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<StoredObject>> {
        validate_key(key)?;
        let inner = self
            .inner
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(inner.objects.get(key).map(|e| StoredObject {
            data: e.data.clone(),
            etag: Some(e.version.to_string()),
        }))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        validate_key(key)?;
        let mut inner = self
            .inner
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(inner.objects.remove(key).is_some())
    }

    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<ListPage> {
        validate_prefix(prefix)?;
        let inner = self
            .inner
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        let lower = match start_after {
            Some(after) if after >= prefix => Bound::Excluded(after.to_owned()),
            _ => Bound::Included(prefix.to_owned()),
        };

        let mut keys: Vec<String> = inner
            .objects
            .range::<String, _>((lower, Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .take(limit.saturating_add(1))
            .cloned()
            .collect();

        let next = if keys.len() > limit {
            keys.truncate(limit);
            keys.last().cloned()
        } else {
            None
        };
        Ok(ListPage { keys, next })
    }

    fn supports_conditional_writes(&self) -> bool {
        true
    }

    async fn put_if(
        &self,
        key: &str,
        value: Vec<u8>,
        condition: WriteCondition,
    ) -> StoreResult<()> {
        validate_key(key)?;
        let mut inner = self
            .inner
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        let current = inner.etag_of(key);
        let holds = match (&condition, current.as_deref()) {
            (WriteCondition::IfAbsent, None) => true,
            (WriteCondition::IfMatch(expected), Some(actual)) => expected == actual,
            _ => false,
        };
        if !holds {
            return Err(StoreError::Conflict {
                key: key.to_owned(),
            });
        }

        let version = inner.bump();
        inner.objects.insert(
            key.to_owned(),
            Entry {
                data: value,
                version,
            },
        );
        Ok(())
    }

    async fn delete_if(&self, key: &str, etag: &str) -> StoreResult<bool> {
        validate_key(key)?;
        let mut inner = self
            .inner
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        match inner.etag_of(key) {
            None => Ok(false),
            Some(actual) if actual == etag => Ok(inner.objects.remove(key).is_some()),
            Some(_) => Err(StoreError::Conflict {
                key: key.to_owned(),
            }),
        }
    }
}
