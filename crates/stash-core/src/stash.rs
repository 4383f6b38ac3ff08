//! The record store coordinator.
//!
//! [`Stash`] maps typed records onto object keys and keeps every declared
//! index in step with record content. Nothing here is transactional: a
//! failed `save` or `delete` may leave partial index effects behind, and
//! repeating the call by id repairs them.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use stash_store::ObjectStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{StashError, StashResult};
use crate::index::{
    BucketIndex, Claim, EqualityIndex, IndexSettings, IndexedColumn, IndexingEngine, NumericIndex,
    UniqueIndex,
};
use crate::keys::{record_key, records_prefix, unescape};
use crate::query::{Bound, Clause, FindOptions, NumericRange, OrderBy};
use crate::record::{Record, RecordData, RecordId};
use crate::schema::{ColumnSchema, EntitySchema, SchemaRegistry};
use crate::value::Value;

/// Coordinator settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StashSettings {
    /// Numeric index strategy.
    pub engine: IndexingEngine,
    /// Index tuning.
    pub index: IndexSettings,
}

/// Object-store-backed record store.
pub struct Stash {
    store: Arc<dyn ObjectStore>,
    registry: SchemaRegistry,
    numeric: Arc<dyn NumericIndex>,
    equality: EqualityIndex,
    unique: UniqueIndex,
    settings: IndexSettings,
}

impl fmt::Debug for Stash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stash")
            .field("entities", &self.registry.names())
            .field("engine", &self.numeric.engine())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Stash {
    /// Create a stash over `store` using the configured engine.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, registry: SchemaRegistry, settings: StashSettings) -> Self {
        let numeric: Arc<dyn NumericIndex> = match settings.engine {
            IndexingEngine::Basic => Arc::new(BucketIndex::new(Arc::clone(&store), &settings.index)),
        };
        Self::from_parts(store, registry, numeric, settings.index)
    }

    /// Create a stash with a caller-supplied numeric index.
    #[must_use]
    pub fn from_parts(
        store: Arc<dyn ObjectStore>,
        registry: SchemaRegistry,
        numeric: Arc<dyn NumericIndex>,
        settings: IndexSettings,
    ) -> Self {
        Self {
            equality: EqualityIndex::new(Arc::clone(&store), &settings),
            unique: UniqueIndex::new(Arc::clone(&store), settings.cas_retries),
            store,
            registry,
            numeric,
            settings,
        }
    }

    /// Registered entities.
    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Save
    // -----------------------------------------------------------------------

    /// Insert or overwrite a record.
    ///
    /// Unique values are claimed first, then the record object is written,
    /// then every index is brought up to date and unique values the record
    /// no longer holds are released.
    ///
    /// # Errors
    ///
    /// - [`StashError::UnknownEntity`] for an unregistered entity
    /// - [`StashError::Validation`] if the data does not fit the schema
    /// - [`StashError::OutOfDomain`] if an indexed number cannot be encoded
    /// - [`StashError::UniqueKeyViolation`] if a unique value is taken
    /// - store errors, possibly after partial index maintenance
    pub async fn save(&self, entity: &str, data: RecordData) -> StashResult<Record> {
        let schema = self.registry.get(entity)?;
        let values = schema.prepare(data.values)?;
        let id = data.id.unwrap_or_else(RecordId::generate);

        for column in schema.columns.iter().filter(|c| c.is_range_indexed()) {
            if let (Some(indexed), Some(n)) = (
                self.indexed_column(&schema, column),
                values.get(&column.name).and_then(Value::as_number),
            ) {
                indexed.check(n)?;
            }
        }

        let prior = self.load(&schema, &id).await?;
        let now = Utc::now();
        let expires_at = match schema.expires_in {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|e| StashError::Validation(format!("expiry of {entity} out of range: {e}")))?;
                Some(now.checked_add_signed(ttl).ok_or_else(|| {
                    StashError::Validation(format!("expiry of {entity} out of range"))
                })?)
            },
            None => None,
        };
        let record = Record {
            id: id.clone(),
            entity: schema.name.clone(),
            values,
            created_at: schema
                .timestamps
                .then(|| prior.as_ref().and_then(|p| p.created_at).unwrap_or(now)),
            updated_at: schema.timestamps.then_some(now),
            expires_at,
            scores: BTreeMap::new(),
        };

        self.claim_unique(&schema, &record).await?;

        self.store
            .put(&record_key(entity, id.as_str()), record.to_stored(&schema)?)
            .await?;

        for column in &schema.columns {
            let old = prior.as_ref().map_or(&Value::Null, |p| p.get(&column.name));
            self.reindex(&schema, column, &id, old, record.get(&column.name))
                .await?;
        }

        debug!(entity, id = %id, update = prior.is_some(), "saved record");
        Ok(record)
    }

    /// Claim every unique value of `record`, releasing fresh claims again if
    /// any value turns out to be taken.
    async fn claim_unique(&self, schema: &EntitySchema, record: &Record) -> StashResult<()> {
        let mut fresh: Vec<(&str, String)> = Vec::new();
        for column in schema.columns.iter().filter(|c| c.unique) {
            let value = record.get(&column.name);
            if value.is_null() {
                continue;
            }
            let encoded = column.codec.encode(value)?;
            match self.claim_one(schema, column, &encoded, &record.id).await {
                Ok(Claim::Fresh) => fresh.push((column.name.as_str(), encoded)),
                Ok(Claim::Held) => {},
                Ok(Claim::Taken(owner)) => {
                    self.release_claims(&schema.name, &fresh, &record.id).await;
                    return Err(StashError::UniqueKeyViolation {
                        entity: schema.name.clone(),
                        column: column.name.clone(),
                        value: encoded,
                        owner: owner.to_string(),
                    });
                },
                Err(err) => {
                    self.release_claims(&schema.name, &fresh, &record.id).await;
                    return Err(err);
                },
            }
        }
        Ok(())
    }

    /// Claim one unique value, reclaiming the pointer when its owner no
    /// longer holds the value.
    async fn claim_one(
        &self,
        schema: &EntitySchema,
        column: &ColumnSchema,
        encoded: &str,
        id: &RecordId,
    ) -> StashResult<Claim> {
        let claim = self.unique.claim(&schema.name, &column.name, encoded, id).await?;
        let Claim::Taken(owner) = claim else {
            return Ok(claim);
        };

        let still_owned = match self.load(schema, &owner).await? {
            Some(record) if !record.is_expired(Utc::now()) => {
                let held = record.get(&column.name);
                !held.is_null() && column.codec.encode(held)? == encoded
            },
            _ => false,
        };
        if still_owned {
            return Ok(Claim::Taken(owner));
        }

        if self
            .unique
            .take_over(&schema.name, &column.name, encoded, &owner, id)
            .await?
        {
            warn!(
                entity = %schema.name,
                column = %column.name,
                stale_owner = %owner,
                id = %id,
                "reclaimed stale unique pointer"
            );
            return Ok(Claim::Fresh);
        }
        // Someone else moved the pointer in between; their claim stands.
        self.unique.claim(&schema.name, &column.name, encoded, id).await
    }

    async fn release_claims(&self, entity: &str, claims: &[(&str, String)], id: &RecordId) {
        for (column, encoded) in claims {
            if let Err(err) = self.unique.release(entity, column, encoded, id).await {
                warn!(entity, column, id = %id, error = %err, "failed to roll back unique claim");
            }
        }
    }

    /// Move one column of `id` from `old` to `new` in whichever indexes the
    /// column has.
    async fn reindex(
        &self,
        schema: &EntitySchema,
        column: &ColumnSchema,
        id: &RecordId,
        old: &Value,
        new: &Value,
    ) -> StashResult<()> {
        if let Some(indexed) = self.indexed_column(schema, column) {
            let (old_n, new_n) = (old.as_number(), new.as_number());
            if let Some(o) = old_n
                && new_n.is_none_or(|n| n.cmp_total(&o) != Ordering::Equal)
            {
                self.numeric.remove(&indexed, id, o).await?;
            }
            if let Some(n) = new_n {
                self.numeric.insert(&indexed, id, n).await?;
            }
        }

        if !column.index || (column.ty.is_numeric() && !column.unique) {
            return Ok(());
        }
        let old_enc = encode_optional(column, old)?;
        let new_enc = encode_optional(column, new)?;

        if column.is_equality_indexed() {
            if let Some(o) = old_enc.as_deref().filter(|o| new_enc.as_deref() != Some(*o)) {
                self.equality.remove(&schema.name, &column.name, o, id).await?;
            }
            if let Some(n) = &new_enc {
                self.equality.add(&schema.name, &column.name, n, id).await?;
            }
        }
        if column.unique
            && let Some(o) = old_enc.as_deref().filter(|o| new_enc.as_deref() != Some(*o))
        {
            self.unique.release(&schema.name, &column.name, o, id).await?;
        }
        Ok(())
    }

    fn indexed_column(&self, schema: &EntitySchema, column: &ColumnSchema) -> Option<IndexedColumn> {
        if !column.is_range_indexed() {
            return None;
        }
        self.settings
            .domain_for(column)
            .map(|domain| IndexedColumn::new(&schema.name, &column.name, domain))
    }

    // -----------------------------------------------------------------------
    // Read & delete
    // -----------------------------------------------------------------------

    /// Read the stored record, expired or not.
    async fn load(&self, schema: &EntitySchema, id: &RecordId) -> StashResult<Option<Record>> {
        match self.store.get(&record_key(&schema.name, id.as_str())).await? {
            Some(object) => Ok(Some(Record::from_stored(schema, &object.data)?)),
            None => Ok(None),
        }
    }

    /// Fetch a live record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::NotFound`] if the record is absent or expired.
    pub async fn get(&self, entity: &str, id: &RecordId) -> StashResult<Record> {
        let schema = self.registry.get(entity)?;
        match self.load(&schema, id).await? {
            Some(record) if !record.is_expired(Utc::now()) => Ok(record),
            _ => Err(not_found(entity, id)),
        }
    }

    /// Remove a record and all its index entries.
    ///
    /// Expired records that have not been purged yet can still be deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::NotFound`] if no record is stored under `id`,
    /// or a store error.
    pub async fn delete(&self, entity: &str, id: &RecordId) -> StashResult<()> {
        let schema = self.registry.get(entity)?;
        let record = self
            .load(&schema, id)
            .await?
            .ok_or_else(|| not_found(entity, id))?;

        for column in &schema.columns {
            self.reindex(&schema, column, id, record.get(&column.name), &Value::Null)
                .await?;
        }
        self.store.delete(&record_key(entity, id.as_str())).await?;
        debug!(entity, id = %id, "deleted record");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Find
    // -----------------------------------------------------------------------

    /// Run a query to completion.
    ///
    /// # Errors
    ///
    /// See [`find_with_cancel`](Self::find_with_cancel).
    pub async fn find(&self, entity: &str, options: &FindOptions) -> StashResult<Vec<Record>> {
        self.find_with_cancel(entity, options, &CancellationToken::new())
            .await
    }

    /// Run a query that stops issuing store calls once `cancel` fires.
    ///
    /// Each clause yields a candidate id set from its index (or a full scan
    /// when the column has none); the sets are intersected, the survivors
    /// fetched and checked against every clause, then sorted and paged.
    ///
    /// # Errors
    ///
    /// - [`StashError::Query`] for malformed clauses
    /// - [`StashError::Cancelled`] once `cancel` fires
    /// - store errors
    pub async fn find_with_cancel(
        &self,
        entity: &str,
        options: &FindOptions,
        cancel: &CancellationToken,
    ) -> StashResult<Vec<Record>> {
        let schema = self.registry.get(entity)?;
        for order in &options.order {
            schema.require_column(&order.column)?;
        }
        let filter = options.filter.normalize(&schema)?;

        let mut candidates: Option<BTreeSet<RecordId>> = None;
        for clause in &filter.clauses {
            if cancel.is_cancelled() {
                return Err(StashError::Cancelled);
            }
            let column = schema.require_column(clause.column())?;
            let Some(ids) = self.resolve(&schema, column, clause, cancel).await? else {
                continue;
            };
            candidates = Some(match candidates {
                Some(current) => current.intersection(&ids).cloned().collect(),
                None => ids,
            });
            if candidates.as_ref().is_some_and(BTreeSet::is_empty) {
                break;
            }
        }

        let scanned = candidates.is_none();
        let ids = match candidates {
            Some(ids) => ids.into_iter().collect(),
            None => self.scan_ids(entity, cancel).await?,
        };
        let candidate_count = ids.len();

        let fetched: Vec<StashResult<Option<Record>>> = stream::iter(ids)
            .map(|id| {
                let schema = &schema;
                async move {
                    if cancel.is_cancelled() {
                        return Err(StashError::Cancelled);
                    }
                    self.load(schema, &id).await
                }
            })
            .buffer_unordered(self.settings.max_in_flight.max(1))
            .collect()
            .await;
        if cancel.is_cancelled() {
            return Err(StashError::Cancelled);
        }

        let now = Utc::now();
        let mut records = Vec::with_capacity(fetched.len());
        for record in fetched {
            // Stale index entries and expired records read as absent.
            if let Some(record) = record?
                && !record.is_expired(now)
                && filter.matches(|c| record.get(c))
            {
                records.push(record);
            }
        }

        records.sort_by(|a, b| compare(&options.order, a, b));
        let mut page: Vec<Record> = records
            .into_iter()
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect();

        if options.scores {
            for record in &mut page {
                attach_scores(&filter.clauses, record);
            }
        }

        debug!(
            entity,
            clauses = filter.clauses.len(),
            full_scan = scanned,
            candidates = candidate_count,
            returned = page.len(),
            "find complete"
        );
        Ok(page)
    }

    /// Candidate ids for one clause, `None` when only a scan can answer it.
    async fn resolve(
        &self,
        schema: &EntitySchema,
        column: &ColumnSchema,
        clause: &Clause,
        cancel: &CancellationToken,
    ) -> StashResult<Option<BTreeSet<RecordId>>> {
        let range = match clause {
            Clause::Range { range, .. } => *range,
            // Nulls never reach an index; only the scan can find them.
            Clause::Equality { value, .. } if value.is_null() => return Ok(None),
            Clause::Equality { value, .. } => {
                if column.is_range_indexed() {
                    match value.as_number() {
                        Some(n) => NumericRange {
                            lower: Some(Bound::inclusive(n)),
                            upper: Some(Bound::inclusive(n)),
                        },
                        None => return Ok(Some(BTreeSet::new())),
                    }
                } else if column.unique {
                    let encoded = column.codec.encode(value)?;
                    let owner = self.unique.owner(&schema.name, &column.name, &encoded).await?;
                    return Ok(Some(owner.into_iter().collect()));
                } else if column.is_equality_indexed() {
                    let encoded = column.codec.encode(value)?;
                    let ids = self.equality.lookup(&schema.name, &column.name, &encoded).await?;
                    return Ok(Some(ids));
                } else {
                    return Ok(None);
                }
            },
        };

        let Some(indexed) = self.indexed_column(schema, column) else {
            return Ok(None);
        };
        let hits = self.numeric.query_range(&indexed, &range, cancel).await?;
        Ok(Some(hits.into_iter().map(|hit| hit.id).collect()))
    }

    /// Every stored record id of an entity.
    async fn scan_ids(&self, entity: &str, cancel: &CancellationToken) -> StashResult<Vec<RecordId>> {
        if cancel.is_cancelled() {
            return Err(StashError::Cancelled);
        }
        let prefix = records_prefix(entity);
        let keys = self.store.list(&prefix).await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(prefix.as_str()))
            .map(|segment| RecordId::from_index(unescape(segment)))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Expiry
    // -----------------------------------------------------------------------

    /// Delete every expired record of an entity. Returns how many went.
    ///
    /// # Errors
    ///
    /// Returns the first store error; records purged before it stay purged.
    pub async fn purge_expired(&self, entity: &str) -> StashResult<usize> {
        let schema = self.registry.get(entity)?;
        let now = Utc::now();
        let mut purged = 0usize;
        for id in self.scan_ids(entity, &CancellationToken::new()).await? {
            let expired = self
                .load(&schema, &id)
                .await?
                .is_some_and(|record| record.is_expired(now));
            if !expired {
                continue;
            }
            match self.delete(entity, &id).await {
                Ok(()) => purged = purged.saturating_add(1),
                // Deleted concurrently.
                Err(StashError::NotFound { .. }) => {},
                Err(err) => return Err(err),
            }
        }
        if purged > 0 {
            info!(entity, purged, "purged expired records");
        }
        Ok(purged)
    }
}

fn not_found(entity: &str, id: &RecordId) -> StashError {
    StashError::NotFound {
        entity: entity.to_owned(),
        id: id.to_string(),
    }
}

fn encode_optional(column: &ColumnSchema, value: &Value) -> StashResult<Option<String>> {
    if value.is_null() {
        return Ok(None);
    }
    Ok(Some(column.codec.encode(value)?))
}

/// Column order (nulls first, reversed when descending), then id.
fn compare(order: &[OrderBy], a: &Record, b: &Record) -> Ordering {
    order
        .iter()
        .map(|o| {
            let ord = a.get(&o.column).sort_cmp(b.get(&o.column));
            if o.descending { ord.reverse() } else { ord }
        })
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.id.cmp(&b.id))
}

fn attach_scores(clauses: &[Clause], record: &mut Record) {
    for clause in clauses {
        let numeric = match clause {
            Clause::Range { .. } => true,
            Clause::Equality { value, .. } => value.as_number().is_some(),
        };
        if !numeric {
            continue;
        }
        if let Some(n) = record.get(clause.column()).as_number() {
            record.scores.insert(clause.column().to_owned(), n);
        }
    }
}
