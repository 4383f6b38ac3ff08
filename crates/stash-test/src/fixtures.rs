//! Test fixtures: schemas, registries and ready-made stashes.

use std::sync::Arc;
use std::time::Duration;

use stash_core::{
    ColumnSchema, ColumnType, EntitySchema, IndexSettings, NumericDomain, RecordData, RecordId,
    SchemaRegistry, Stash, StashSettings,
};
use stash_store::{MemoryObjectStore, ObjectStore};
use tracing_subscriber::EnvFilter;

/// Set up test logging with the given filter. Later calls are no-ops.
pub fn setup_test_logging(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_test_writer()
        .try_init();
}

/// `users`: unique `email`, range-indexed `score` (integer) and `balance`
/// (float with two fraction digits), equality-indexed `team`, plain `nick`.
#[must_use]
pub fn users_schema() -> EntitySchema {
    EntitySchema::new("users")
        .column(ColumnSchema::new("email", ColumnType::String).unique())
        .column(ColumnSchema::new("score", ColumnType::Integer).indexed())
        .column(
            ColumnSchema::new("balance", ColumnType::Float)
                .indexed()
                .with_domain(NumericDomain {
                    integer_digits: 9,
                    fraction_digits: 2,
                }),
        )
        .column(ColumnSchema::new("team", ColumnType::String).indexed())
        .column(ColumnSchema::new("nick", ColumnType::String))
}

/// `sessions`: records expire after `ttl`; `token` is unique.
#[must_use]
pub fn sessions_schema(ttl: Duration) -> EntitySchema {
    EntitySchema::new("sessions")
        .expires_in(ttl)
        .column(ColumnSchema::new("token", ColumnType::String).unique())
        .column(ColumnSchema::new("started", ColumnType::Date).indexed())
}

/// Registry holding [`users_schema`] and a one-hour [`sessions_schema`].
///
/// # Panics
///
/// Panics if the fixture schemas stop validating.
#[must_use]
pub fn test_registry() -> SchemaRegistry {
    SchemaRegistry::new()
        .with(users_schema())
        .and_then(|r| r.with(sessions_schema(Duration::from_secs(3600))))
        .unwrap_or_else(|e| panic!("fixture schemas must validate: {e}"))
}

/// Index settings with a small fan-out so tests hit leaf sharding.
#[must_use]
pub fn small_index_settings(fan_out: usize) -> IndexSettings {
    IndexSettings {
        fan_out,
        max_in_flight: 4,
        ..IndexSettings::default()
    }
}

/// A stash over a fresh in-memory store, with the store handle for
/// inspecting raw keys.
#[must_use]
pub fn memory_stash() -> (Arc<MemoryObjectStore>, Stash) {
    let store = Arc::new(MemoryObjectStore::new());
    let stash = stash_over(store.clone(), StashSettings::default());
    (store, stash)
}

/// A stash over `store` using [`test_registry`].
#[must_use]
pub fn stash_over(store: Arc<dyn ObjectStore>, settings: StashSettings) -> Stash {
    Stash::new(store, test_registry(), settings)
}

/// Record data for a `users` row with id `id`.
///
/// # Panics
///
/// Panics if `id` is not a valid record id.
#[must_use]
pub fn user(id: &str, email: &str, score: i64) -> RecordData {
    let id = RecordId::new(id).unwrap_or_else(|e| panic!("fixture id {id:?}: {e}"));
    RecordData::new()
        .with_id(id)
        .set("email", email)
        .set("score", score)
}

/// Parse a record id, panicking on invalid input.
///
/// # Panics
///
/// Panics if `id` is not a valid record id.
#[must_use]
pub fn rid(id: &str) -> RecordId {
    RecordId::new(id).unwrap_or_else(|e| panic!("fixture id {id:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use stash_core::{Bound, FindOptions, Where};

    use super::*;

    #[test]
    fn test_registry_fixture() {
        let registry = test_registry();
        let mut names = registry.names();
        names.sort_unstable();
        assert_eq!(names, vec!["sessions", "users"]);
    }

    #[tokio::test]
    async fn test_memory_stash_round_trip() {
        let (store, stash) = memory_stash();
        stash.save("users", user("a", "a@x.com", 7)).await.unwrap();

        let hits = stash
            .find(
                "users",
                &FindOptions::new().filter(Where::new().range(
                    "score",
                    Some(Bound::inclusive(5)),
                    None,
                )),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(!store.is_empty().unwrap());
    }
}
