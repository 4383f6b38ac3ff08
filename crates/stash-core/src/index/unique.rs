//! Unique-value pointers.
//!
//! A unique column value is claimed by writing a pointer object at
//! `{entity}/{column}/{value}` that names the owning record.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stash_store::ObjectStore;
use tracing::debug;

use crate::error::StashResult;
use crate::index::cas::{Mutation, update_object};
use crate::keys::unique_key;
use crate::record::RecordId;

#[derive(Debug, Serialize, Deserialize)]
struct Pointer {
    id: RecordId,
}

/// Result of claiming a unique value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The value was free and now belongs to the claimant.
    Fresh,
    /// The claimant already held the value.
    Held,
    /// Another record holds the value.
    Taken(RecordId),
}

/// Unique-value pointers for all entities of a store.
#[derive(Clone)]
pub struct UniqueIndex {
    store: Arc<dyn ObjectStore>,
    cas_retries: u32,
}

impl fmt::Debug for UniqueIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniqueIndex")
            .field("cas_retries", &self.cas_retries)
            .finish_non_exhaustive()
    }
}

impl UniqueIndex {
    /// Create an index over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, cas_retries: u32) -> Self {
        Self { store, cas_retries }
    }

    /// Current owner of `encoded` in `entity.column`.
    ///
    /// # Errors
    ///
    /// Returns a store or serialisation error.
    pub async fn owner(&self, entity: &str, column: &str, encoded: &str) -> StashResult<Option<RecordId>> {
        let key = unique_key(entity, column, encoded);
        match self.store.get(&key).await? {
            Some(object) => Ok(Some(serde_json::from_slice::<Pointer>(&object.data)?.id)),
            None => Ok(None),
        }
    }

    /// Claim `encoded` for `id` unless another record holds it.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn claim(&self, entity: &str, column: &str, encoded: &str, id: &RecordId) -> StashResult<Claim> {
        let key = unique_key(entity, column, encoded);
        let claim = update_object(self.store.as_ref(), &key, self.cas_retries, |current: Option<Pointer>| {
            match current {
                None => Mutation::Put(Pointer { id: id.clone() }, Claim::Fresh),
                Some(p) if p.id == *id => Mutation::Keep(Claim::Held),
                Some(p) => Mutation::Keep(Claim::Taken(p.id)),
            }
        })
        .await?;
        if claim == Claim::Fresh {
            debug!(pointer = %key, id = %id, "claimed unique value");
        }
        Ok(claim)
    }

    /// Hand `encoded` over from `stale` to `id`, only if `stale` still owns
    /// it. Returns whether the takeover happened.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn take_over(
        &self,
        entity: &str,
        column: &str,
        encoded: &str,
        stale: &RecordId,
        id: &RecordId,
    ) -> StashResult<bool> {
        let key = unique_key(entity, column, encoded);
        update_object(self.store.as_ref(), &key, self.cas_retries, |current: Option<Pointer>| {
            match current {
                Some(p) if p.id == *stale => Mutation::Put(Pointer { id: id.clone() }, true),
                _ => Mutation::Keep(false),
            }
        })
        .await
    }

    /// Drop the pointer if `id` owns it. Returns whether it was dropped.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn release(&self, entity: &str, column: &str, encoded: &str, id: &RecordId) -> StashResult<bool> {
        let key = unique_key(entity, column, encoded);
        let released = update_object(self.store.as_ref(), &key, self.cas_retries, |current: Option<Pointer>| {
            match current {
                Some(p) if p.id == *id => Mutation::Delete(true),
                _ => Mutation::Keep(false),
            }
        })
        .await?;
        if released {
            debug!(pointer = %key, id = %id, "released unique value");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use stash_store::MemoryObjectStore;

    use super::*;

    fn id(s: &str) -> RecordId {
        RecordId::new(s).unwrap()
    }

    fn index() -> UniqueIndex {
        UniqueIndex::new(Arc::new(MemoryObjectStore::new()), 5)
    }

    #[tokio::test]
    async fn test_claim_lifecycle() {
        let unique = index();
        let (a, b) = (id("a"), id("b"));
        assert_eq!(unique.claim("users", "email", "x@x.com", &a).await.unwrap(), Claim::Fresh);
        assert_eq!(unique.claim("users", "email", "x@x.com", &a).await.unwrap(), Claim::Held);
        assert_eq!(
            unique.claim("users", "email", "x@x.com", &b).await.unwrap(),
            Claim::Taken(a.clone())
        );
        assert_eq!(unique.owner("users", "email", "x@x.com").await.unwrap(), Some(a.clone()));

        assert!(!unique.release("users", "email", "x@x.com", &b).await.unwrap());
        assert!(unique.release("users", "email", "x@x.com", &a).await.unwrap());
        assert_eq!(unique.owner("users", "email", "x@x.com").await.unwrap(), None);
        assert_eq!(unique.claim("users", "email", "x@x.com", &b).await.unwrap(), Claim::Fresh);
    }

    #[tokio::test]
    async fn test_take_over_requires_stale_owner() {
        let unique = index();
        let (a, b, c) = (id("a"), id("b"), id("c"));
        unique.claim("users", "email", "x", &a).await.unwrap();
        assert!(!unique.take_over("users", "email", "x", &b, &c).await.unwrap());
        assert!(unique.take_over("users", "email", "x", &a, &c).await.unwrap());
        assert_eq!(unique.owner("users", "email", "x").await.unwrap(), Some(c));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_claims_have_one_winner() {
        let unique = index();
        let mut tasks = Vec::new();
        for i in 0..8 {
            let unique = unique.clone();
            tasks.push(tokio::spawn(async move {
                unique
                    .claim("users", "email", "hot", &id(&format!("r{i}")))
                    .await
                    .unwrap()
            }));
        }
        let mut fresh = 0usize;
        for task in tasks {
            if task.await.unwrap() == Claim::Fresh {
                fresh = fresh.saturating_add(1);
            }
        }
        assert_eq!(fresh, 1);
    }
}
