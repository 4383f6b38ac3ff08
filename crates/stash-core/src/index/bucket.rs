//! The digit-bucketed numeric index.
//!
//! Every `(id, value)` pair lives in the leaf at the value's full canonical
//! path, `{entity}/{column}/index/{canonical}`. The trie above the leaves is
//! never materialised: a range query lists the prefixes produced by the
//! planner and so visits each level only implicitly.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use stash_store::{DEFAULT_LIST_PAGE, ObjectStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{StashError, StashResult};
use crate::index::encoding::{self, DomainOverflow};
use crate::index::leaf::LeafSet;
use crate::index::planner;
use crate::index::{IndexSettings, IndexedColumn, IndexingEngine, NumericIndex, RangeHit};
use crate::keys::{SHARD_SEPARATOR, numeric_key, numeric_prefix};
use crate::query::NumericRange;
use crate::record::RecordId;
use crate::value::Number;

/// Digit-bucketed [`NumericIndex`].
#[derive(Clone)]
pub struct BucketIndex {
    store: Arc<dyn ObjectStore>,
    leaves: LeafSet,
    max_list_calls: usize,
    max_in_flight: usize,
}

impl fmt::Debug for BucketIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketIndex")
            .field("max_list_calls", &self.max_list_calls)
            .field("max_in_flight", &self.max_in_flight)
            .finish_non_exhaustive()
    }
}

impl BucketIndex {
    /// Create an index over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, settings: &IndexSettings) -> Self {
        Self {
            leaves: LeafSet::new(Arc::clone(&store), settings.fan_out, settings.cas_retries),
            store,
            max_list_calls: settings.max_list_calls.max(1),
            max_in_flight: settings.max_in_flight.max(1),
        }
    }

    /// Canonical key interval holding every value of `range`, or `None` when
    /// the range lies entirely outside the domain.
    fn key_interval(column: &IndexedColumn, range: &NumericRange) -> StashResult<Option<(String, String)>> {
        let domain = column.domain;
        let nan = || StashError::Query(format!("range bound on {} must not be NaN", column.column));

        let lo = match range.lower.map(|b| encoding::encode(domain, b.value)) {
            None | Some(Err(DomainOverflow::Below)) => encoding::min_key(domain),
            Some(Ok(canonical)) => canonical.key,
            Some(Err(DomainOverflow::Above)) => return Ok(None),
            Some(Err(DomainOverflow::NotANumber)) => return Err(nan()),
        };
        let hi = match range.upper.map(|b| encoding::encode(domain, b.value)) {
            None | Some(Err(DomainOverflow::Above)) => encoding::max_key(domain),
            Some(Ok(canonical)) => canonical.key,
            Some(Err(DomainOverflow::Below)) => return Ok(None),
            Some(Err(DomainOverflow::NotANumber)) => return Err(nan()),
        };
        Ok((lo <= hi).then_some((lo, hi)))
    }

    /// All keys under `prefix`, page by page, stopping early once cancelled.
    async fn list_prefix(&self, prefix: &str, cancel: &CancellationToken) -> StashResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                return Err(StashError::Cancelled);
            }
            let page = self
                .store
                .list_page(prefix, cursor.as_deref(), DEFAULT_LIST_PAGE)
                .await?;
            keys.extend(page.keys);
            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(keys),
            }
        }
    }
}

#[async_trait]
impl NumericIndex for BucketIndex {
    fn engine(&self) -> IndexingEngine {
        IndexingEngine::Basic
    }

    async fn insert(&self, column: &IndexedColumn, id: &RecordId, value: Number) -> StashResult<bool> {
        let canonical = encoding::encode(column.domain, value).map_err(|_| StashError::OutOfDomain {
            column: column.column.clone(),
            value: value.to_string(),
        })?;
        let key = numeric_key(&column.entity, &column.column, &canonical.key);
        let exact = canonical.lossy.then(|| value.as_f64());
        let written = self.leaves.insert(&key, id.as_str(), exact).await?;
        if written {
            debug!(leaf = %key, id = %id, "indexed value");
        }
        Ok(written)
    }

    async fn remove(&self, column: &IndexedColumn, id: &RecordId, value: Number) -> StashResult<bool> {
        // Never indexed, so nothing to remove.
        let Ok(canonical) = encoding::encode(column.domain, value) else {
            return Ok(false);
        };
        let key = numeric_key(&column.entity, &column.column, &canonical.key);
        let removed = self.leaves.remove(&key, id.as_str()).await?;
        if removed {
            debug!(leaf = %key, id = %id, "unindexed value");
        }
        Ok(removed)
    }

    async fn query_range(
        &self,
        column: &IndexedColumn,
        range: &NumericRange,
        cancel: &CancellationToken,
    ) -> StashResult<Vec<RangeHit>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let Some((lo, hi)) = Self::key_interval(column, range)? else {
            return Ok(Vec::new());
        };

        let base = numeric_prefix(&column.entity, &column.column);
        let plan = planner::cover(&lo, &hi, self.max_list_calls);

        // Listing. Every sub-call that was issued runs to completion.
        let prefixes: Vec<String> = plan.iter().map(|prefix| format!("{base}{prefix}")).collect();
        let listed: Vec<StashResult<Vec<String>>> = stream::iter(prefixes)
            .map(|full| async move { self.list_prefix(&full, cancel).await })
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;
        if cancel.is_cancelled() {
            return Err(StashError::Cancelled);
        }

        let key_len = encoding::key_len(column.domain);
        let mut leaves = Vec::new();
        for keys in listed {
            for key in keys? {
                let Some(rest) = key.strip_prefix(base.as_str()) else {
                    continue;
                };
                let canonical = rest.split(SHARD_SEPARATOR).next().unwrap_or(rest);
                if canonical.len() == key_len && lo.as_str() <= canonical && canonical <= hi.as_str() {
                    leaves.push((key.clone(), canonical.to_owned()));
                }
            }
        }
        let listed_count = leaves.len();

        let fetched: Vec<StashResult<_>> = stream::iter(leaves)
            .map(|(key, canonical)| async move {
                if cancel.is_cancelled() {
                    return Err(StashError::Cancelled);
                }
                Ok((self.leaves.read(&key).await?, canonical))
            })
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;
        if cancel.is_cancelled() {
            return Err(StashError::Cancelled);
        }

        let mut matched: BTreeMap<String, Number> = BTreeMap::new();
        for result in fetched {
            // Listed but already gone: listings may lag behind deletes.
            let (Some(leaf), canonical) = result? else {
                continue;
            };
            let Some(bucket_value) = encoding::decode(column.domain, &canonical) else {
                warn!(leaf = %canonical, column = %column.column, "undecodable index leaf");
                continue;
            };
            for (id, exact) in leaf.entries {
                let value = exact.map_or(bucket_value, Number::Float);
                if range.contains(&value) {
                    matched.entry(id).or_insert(value);
                }
            }
        }

        let mut hits: Vec<RangeHit> = matched
            .into_iter()
            .map(|(id, value)| RangeHit {
                id: RecordId::from_index(id),
                value,
            })
            .collect();
        hits.sort_by(|a, b| a.value.cmp_total(&b.value).then_with(|| a.id.cmp(&b.id)));

        debug!(
            entity = %column.entity,
            column = %column.column,
            prefixes = plan.len(),
            leaves = listed_count,
            hits = hits.len(),
            "range query complete"
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use stash_store::MemoryObjectStore;

    use super::*;
    use crate::query::Bound;
    use crate::schema::NumericDomain;

    fn small() -> IndexedColumn {
        IndexedColumn::new("users", "score", NumericDomain::new(3, 0).unwrap())
    }

    fn index(fan_out: usize, max_list_calls: usize) -> (BucketIndex, Arc<MemoryObjectStore>) {
        let store = Arc::new(MemoryObjectStore::new());
        let settings = IndexSettings {
            fan_out,
            max_list_calls,
            ..IndexSettings::default()
        };
        (BucketIndex::new(store.clone(), &settings), store)
    }

    fn id(s: &str) -> RecordId {
        RecordId::new(s).unwrap()
    }

    async fn ids(index: &BucketIndex, column: &IndexedColumn, range: NumericRange) -> Vec<String> {
        index
            .query_range(column, &range, &CancellationToken::new())
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.id.to_string())
            .collect()
    }

    fn between(lower: Option<Bound>, upper: Option<Bound>) -> NumericRange {
        NumericRange { lower, upper }
    }

    async fn seeded() -> (BucketIndex, IndexedColumn) {
        let (index, _) = index(200, 64);
        let column = small();
        for (i, score) in [10, 20, 30, 40, 50].into_iter().enumerate() {
            let name = i.saturating_add(1).to_string();
            index.insert(&column, &id(&name), Number::Int(score)).await.unwrap();
        }
        (index, column)
    }

    #[tokio::test]
    async fn test_half_open_range() {
        let (index, column) = seeded().await;
        let range = between(Some(Bound::inclusive(20)), Some(Bound::exclusive(40)));
        assert_eq!(ids(&index, &column, range).await, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn test_boundary_exclusivity() {
        let (index, column) = seeded().await;
        let range = between(Some(Bound::exclusive(20)), Some(Bound::inclusive(40)));
        assert_eq!(ids(&index, &column, range).await, vec!["3", "4"]);
    }

    #[tokio::test]
    async fn test_remove_then_query() {
        let (index, column) = seeded().await;
        assert!(index.remove(&column, &id("3"), Number::Int(30)).await.unwrap());
        assert!(!index.remove(&column, &id("3"), Number::Int(30)).await.unwrap());
        let range = between(Some(Bound::inclusive(20)), Some(Bound::exclusive(40)));
        assert_eq!(ids(&index, &column, range).await, vec!["2"]);
    }

    #[tokio::test]
    async fn test_unbounded_and_out_of_domain_bounds() {
        let (index, column) = seeded().await;
        assert_eq!(ids(&index, &column, NumericRange::default()).await.len(), 5);
        let above = between(Some(Bound::inclusive(5000)), None);
        assert!(ids(&index, &column, above).await.is_empty());
        let below = between(None, Some(Bound::exclusive(-5000)));
        assert!(ids(&index, &column, below).await.is_empty());
        let wide = between(Some(Bound::inclusive(-5000)), Some(Bound::inclusive(5000)));
        assert_eq!(ids(&index, &column, wide).await.len(), 5);
        let empty = between(Some(Bound::exclusive(30)), Some(Bound::exclusive(30)));
        assert!(ids(&index, &column, empty).await.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_domain_insert() {
        let (index, _) = index(200, 64);
        let err = index.insert(&small(), &id("a"), Number::Int(1000)).await.unwrap_err();
        assert!(matches!(err, StashError::OutOfDomain { ref column, .. } if column == "score"));
        assert!(!index.remove(&small(), &id("a"), Number::Int(1000)).await.unwrap());
    }

    #[tokio::test]
    async fn test_lossy_values_filter_on_exact_value() {
        let (index, _) = index(200, 64);
        let column = IndexedColumn::new("m", "x", NumericDomain::new(3, 1).unwrap());
        index.insert(&column, &id("a"), Number::Float(1.24)).await.unwrap();
        index.insert(&column, &id("b"), Number::Float(1.21)).await.unwrap();
        // Both land in leaf P0012; only the exact value separates them.
        let range = between(Some(Bound::exclusive(1.22)), None);
        let hits = index
            .query_range(&column, &range, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "a");
        assert_eq!(hits[0].value, Number::Float(1.24));
    }

    #[tokio::test]
    async fn test_negative_values_cross_sign() {
        let (index, _) = index(200, 64);
        let column = small();
        for v in [-50, -5, -1, 0, 1, 5, 50] {
            index.insert(&column, &id(&format!("v{v}")), Number::Int(v)).await.unwrap();
        }
        let range = between(Some(Bound::inclusive(-5)), Some(Bound::exclusive(5)));
        let hits = index
            .query_range(&column, &range, &CancellationToken::new())
            .await
            .unwrap();
        let values: Vec<Number> = hits.into_iter().map(|h| h.value).collect();
        assert_eq!(
            values,
            vec![Number::Int(-5), Number::Int(-1), Number::Int(0), Number::Int(1)]
        );
    }

    #[tokio::test]
    async fn test_ties_beyond_fan_out_are_sharded() {
        let (index, store) = index(2, 64);
        let column = small();
        for name in ["a", "b", "c", "d", "e"] {
            index.insert(&column, &id(name), Number::Int(7)).await.unwrap();
        }
        let keys = store.list("users/score/index/").await.unwrap();
        assert_eq!(
            keys,
            vec!["users/score/index/P007", "users/score/index/P007~1", "users/score/index/P007~2"]
        );
        let range = between(Some(Bound::inclusive(7)), Some(Bound::inclusive(7)));
        assert_eq!(ids(&index, &column, range).await, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_cancelled_query_issues_nothing() {
        let (index, _) = seeded().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = index
            .query_range(&small(), &NumericRange::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StashError::Cancelled));
    }

    fn bound() -> impl Strategy<Value = Option<Bound>> {
        prop_oneof![
            Just(None),
            (-120i64..120, any::<bool>()).prop_map(|(v, inclusive)| Some(Bound {
                value: Number::Int(v),
                inclusive,
            })),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_query_matches_brute_force(
            values in proptest::collection::vec(-100i64..100, 0..40),
            lower in bound(),
            upper in bound(),
            fan_out in 1usize..6,
            max_list_calls in 1usize..12,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let (index, _) = index(fan_out, max_list_calls);
                let column = small();
                for (i, v) in values.iter().enumerate() {
                    index.insert(&column, &id(&format!("{i:03}")), Number::Int(*v)).await.unwrap();
                }
                let range = NumericRange { lower, upper };
                let mut got = ids(&index, &column, range).await;
                got.sort();
                let expected: Vec<String> = values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| range.contains(&Number::Int(**v)))
                    .map(|(i, _)| format!("{i:03}"))
                    .collect();
                assert_eq!(got, expected);
            });
        }
    }
}
