//! Bounded id sets stored as leaf objects.
//!
//! A leaf holds at most `fan_out` ids. When more ids share one leaf key, the
//! surplus goes to overflow shards `{leaf}~1`, `{leaf}~2`, ... and the base
//! leaf records how many shards were opened. Every id lives in exactly one
//! of the base leaf or its shards.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stash_store::{ObjectStore, StoreError};
use tracing::debug;

use crate::error::{StashError, StashResult};
use crate::index::cas::{Mutation, update_object};
use crate::keys::shard_key;

/// Stored leaf payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Leaf {
    /// Record id to exact value. The value is only present when the leaf key
    /// alone does not pin it down.
    #[serde(default)]
    pub(crate) entries: BTreeMap<String, Option<f64>>,
    /// Number of overflow shards opened under this base leaf.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub(crate) shards: u32,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(n: &u32) -> bool {
    *n == 0
}

enum Placement {
    /// The id was already stored with the same exact value.
    Present,
    /// The entry was added or its exact value refreshed.
    Written,
    /// The leaf is full.
    Full,
}

impl Leaf {
    fn place(&mut self, id: &str, exact: Option<f64>, fan_out: usize) -> Placement {
        if let Some(current) = self.entries.get_mut(id) {
            if *current == exact {
                return Placement::Present;
            }
            *current = exact;
            return Placement::Written;
        }
        if self.entries.len() >= fan_out {
            return Placement::Full;
        }
        self.entries.insert(id.to_owned(), exact);
        Placement::Written
    }
}

/// Leaf-set operations bound to one store.
#[derive(Clone)]
pub(crate) struct LeafSet {
    store: Arc<dyn ObjectStore>,
    fan_out: usize,
    cas_retries: u32,
}

impl LeafSet {
    pub(crate) fn new(store: Arc<dyn ObjectStore>, fan_out: usize, cas_retries: u32) -> Self {
        Self {
            store,
            fan_out: fan_out.max(1),
            cas_retries,
        }
    }

    async fn update<R>(
        &self,
        key: &str,
        mutate: impl FnMut(Option<Leaf>) -> Mutation<Leaf, R>,
    ) -> StashResult<R> {
        update_object(self.store.as_ref(), key, self.cas_retries, mutate).await
    }

    /// Read a single leaf object.
    pub(crate) async fn read(&self, key: &str) -> StashResult<Option<Leaf>> {
        match self.store.get(key).await? {
            Some(object) => Ok(Some(serde_json::from_slice(&object.data)?)),
            None => Ok(None),
        }
    }

    /// All entries of a base leaf and its shards.
    pub(crate) async fn members(&self, base: &str) -> StashResult<BTreeMap<String, Option<f64>>> {
        let Some(leaf) = self.read(base).await? else {
            return Ok(BTreeMap::new());
        };
        let mut entries = leaf.entries;
        for n in 1..=leaf.shards {
            if let Some(shard) = self.read(&shard_key(base, n)).await? {
                entries.extend(shard.entries);
            }
        }
        Ok(entries)
    }

    /// Add `id` under `base`. Returns whether anything was written.
    pub(crate) async fn insert(&self, base: &str, id: &str, exact: Option<f64>) -> StashResult<bool> {
        let fan_out = self.fan_out;

        // Common case: no shards, room in the base leaf, or id already there.
        let first = self
            .update(base, |leaf| {
                let mut leaf = leaf.unwrap_or_default();
                if leaf.shards > 0 && !leaf.entries.contains_key(id) {
                    return Mutation::Keep(Err(leaf.shards));
                }
                match leaf.place(id, exact, fan_out) {
                    Placement::Present => Mutation::Keep(Ok(false)),
                    Placement::Written => Mutation::Put(leaf, Ok(true)),
                    Placement::Full => Mutation::Keep(Err(leaf.shards)),
                }
            })
            .await?;
        let mut shards = match first {
            Ok(changed) => return Ok(changed),
            Err(shards) => shards,
        };

        // The id may already live in a shard.
        for n in 1..=shards {
            let hit = self
                .update(&shard_key(base, n), |leaf| match leaf {
                    Some(mut leaf) if leaf.entries.contains_key(id) => {
                        match leaf.place(id, exact, usize::MAX) {
                            Placement::Present => Mutation::Keep(Some(false)),
                            _ => Mutation::Put(leaf, Some(true)),
                        }
                    },
                    _ => Mutation::Keep(None),
                })
                .await?;
            if let Some(changed) = hit {
                return Ok(changed);
            }
        }

        for _ in 0..=self.cas_retries {
            // First leaf with room wins, base included.
            let mut keys = vec![base.to_owned()];
            keys.extend((1..=shards).map(|n| shard_key(base, n)));
            for key in &keys {
                let placed = self
                    .update(key, |leaf| {
                        let mut leaf = leaf.unwrap_or_default();
                        match leaf.place(id, exact, fan_out) {
                            Placement::Present => Mutation::Keep(Some(false)),
                            Placement::Written => Mutation::Put(leaf, Some(true)),
                            Placement::Full => Mutation::Keep(None),
                        }
                    })
                    .await?;
                if let Some(changed) = placed {
                    return Ok(changed);
                }
            }

            // Everything is full: register a new shard on the base, then fill it.
            shards = self
                .update(base, |leaf| {
                    let mut leaf = leaf.unwrap_or_default();
                    leaf.shards = leaf.shards.saturating_add(1);
                    let opened = leaf.shards;
                    Mutation::Put(leaf, opened)
                })
                .await?;
            debug!(leaf = base, shard = shards, "opened overflow shard");
        }

        Err(StashError::Store(StoreError::Conflict {
            key: base.to_owned(),
        }))
    }

    /// Remove `id` from `base` or its shards. Returns whether it was present.
    pub(crate) async fn remove(&self, base: &str, id: &str) -> StashResult<bool> {
        let first = self
            .update(base, |leaf| match leaf {
                None => Mutation::Keep(Err(0)),
                Some(mut leaf) => {
                    if leaf.entries.remove(id).is_none() {
                        return Mutation::Keep(Err(leaf.shards));
                    }
                    let shards = leaf.shards;
                    if leaf.entries.is_empty() && shards == 0 {
                        Mutation::Delete(Ok(0))
                    } else {
                        let emptied = leaf.entries.is_empty();
                        Mutation::Put(leaf, Ok(if emptied { shards } else { 0 }))
                    }
                },
            })
            .await?;
        let shards = match first {
            Ok(0) => return Ok(true),
            Ok(shards) => {
                self.tidy(base, shards).await?;
                return Ok(true);
            },
            Err(shards) => shards,
        };

        for n in 1..=shards {
            let removed = self
                .update(&shard_key(base, n), |leaf| {
                    let Some(mut leaf) = leaf else {
                        return Mutation::Keep(false);
                    };
                    if leaf.entries.remove(id).is_none() {
                        Mutation::Keep(false)
                    } else if leaf.entries.is_empty() {
                        Mutation::Delete(true)
                    } else {
                        Mutation::Put(leaf, true)
                    }
                })
                .await?;
            if removed {
                self.tidy(base, shards).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Delete an empty base leaf once none of its shards hold anything.
    async fn tidy(&self, base: &str, shards: u32) -> StashResult<()> {
        for n in 1..=shards {
            if self.store.get(&shard_key(base, n)).await?.is_some() {
                return Ok(());
            }
        }
        self.update(base, |leaf| match leaf {
            Some(leaf) if leaf.entries.is_empty() && leaf.shards == shards => Mutation::Delete(()),
            _ => Mutation::Keep(()),
        })
        .await
    }
}
