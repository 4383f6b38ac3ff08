//! Read-modify-write of small JSON objects.
//!
//! On stores with conditional writes the update runs as a compare-and-swap
//! loop: read with entity tag, apply the mutation, write back only if the tag
//! is unchanged, and on conflict re-read and re-apply. Stores without
//! conditional writes fall back to a plain read then write, where the last
//! writer wins.

use serde::Serialize;
use serde::de::DeserializeOwned;
use stash_store::{ObjectStore, StoreError, WriteCondition};
use tracing::debug;

use crate::error::{StashError, StashResult};

/// Outcome of a mutation closure.
pub(crate) enum Mutation<T, R> {
    /// Leave the object as is.
    Keep(R),
    /// Replace (or create) the object.
    Put(T, R),
    /// Delete the object.
    Delete(R),
}

/// Apply `mutate` to the object at `key`, retrying on write conflicts.
///
/// `mutate` may run several times and must be a pure function of its input.
pub(crate) async fn update_object<T, R, F>(
    store: &dyn ObjectStore,
    key: &str,
    cas_retries: u32,
    mut mutate: F,
) -> StashResult<R>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(Option<T>) -> Mutation<T, R>,
{
    let conditional = store.supports_conditional_writes();
    let mut conflicts: u32 = 0;
    loop {
        let (current, etag) = match store.get(key).await? {
            Some(object) => (Some(serde_json::from_slice::<T>(&object.data)?), object.etag),
            None => (None, None),
        };

        let outcome = match mutate(current) {
            Mutation::Keep(result) => return Ok(result),
            Mutation::Put(value, result) => {
                let bytes = serde_json::to_vec(&value)?;
                if !conditional {
                    store.put(key, bytes).await?;
                    return Ok(result);
                }
                let condition = match etag {
                    Some(tag) => WriteCondition::IfMatch(tag),
                    None => WriteCondition::IfAbsent,
                };
                store.put_if(key, bytes, condition).await.map(|()| result)
            },
            Mutation::Delete(result) => match (conditional, etag) {
                (false, _) => {
                    store.delete(key).await?;
                    return Ok(result);
                },
                (true, Some(tag)) => store.delete_if(key, &tag).await.map(|_| result),
                (true, None) => return Ok(result),
            },
        };

        match outcome {
            Ok(result) => return Ok(result),
            Err(StoreError::Conflict { .. }) if conflicts < cas_retries => {
                conflicts = conflicts.saturating_add(1);
                debug!(key, conflicts, "write conflict, re-reading");
            },
            Err(err @ StoreError::Conflict { .. }) => return Err(StashError::Store(err)),
            Err(err) => return Err(err.into()),
        }
    }
}
