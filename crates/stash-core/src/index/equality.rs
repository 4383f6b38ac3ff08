//! Equality index for non-numeric columns.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use stash_store::ObjectStore;
use tracing::debug;

use crate::error::StashResult;
use crate::index::IndexSettings;
use crate::index::leaf::LeafSet;
use crate::keys::equality_key;
use crate::record::RecordId;

/// Maps an encoded column value to the ids holding it.
///
/// Each value owns a leaf set at `{entity}/{column}/eq/{value}`, sharded the
/// same way as numeric leaves once it holds more than `fan_out` ids.
#[derive(Clone)]
pub struct EqualityIndex {
    leaves: LeafSet,
}

impl fmt::Debug for EqualityIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EqualityIndex").finish_non_exhaustive()
    }
}

impl EqualityIndex {
    /// Create an index over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, settings: &IndexSettings) -> Self {
        Self {
            leaves: LeafSet::new(store, settings.fan_out, settings.cas_retries),
        }
    }

    /// Record that `id` holds `encoded` in `entity.column`.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn add(&self, entity: &str, column: &str, encoded: &str, id: &RecordId) -> StashResult<bool> {
        let key = equality_key(entity, column, encoded);
        let added = self.leaves.insert(&key, id.as_str(), None).await?;
        if added {
            debug!(leaf = %key, id = %id, "indexed value");
        }
        Ok(added)
    }

    /// Forget that `id` holds `encoded`. Absent ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn remove(&self, entity: &str, column: &str, encoded: &str, id: &RecordId) -> StashResult<bool> {
        let key = equality_key(entity, column, encoded);
        self.leaves.remove(&key, id.as_str()).await
    }

    /// Ids currently recorded for `encoded`.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn lookup(&self, entity: &str, column: &str, encoded: &str) -> StashResult<BTreeSet<RecordId>> {
        let key = equality_key(entity, column, encoded);
        let members = self.leaves.members(&key).await?;
        Ok(members.into_keys().map(RecordId::from_index).collect())
    }
}
