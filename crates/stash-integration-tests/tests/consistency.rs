//! Queries over a store whose listings trail its writes.
//!
//! Range queries discover leaves by listing, so a fresh leaf can be missed
//! until the listing catches up, and a deleted one can linger. Neither may
//! ever produce a record that is not really there.

mod common;

use std::sync::Arc;

use serde_json::json;
use stash_core::keys::record_key;
use stash_core::{FindOptions, Stash, StashSettings};
use stash_store::{MemoryObjectStore, ObjectStore};
use stash_test::{LaggyListStore, rid, stash_over, user};

use common::{find_users, ids, seed_scores, set};

fn laggy() -> (Arc<LaggyListStore<MemoryObjectStore>>, Stash) {
    let store = Arc::new(LaggyListStore::new(MemoryObjectStore::new()));
    let stash = stash_over(store.clone(), StashSettings::default());
    (store, stash)
}

#[tokio::test]
async fn test_new_leaf_appears_once_listing_settles() {
    let (store, stash) = laggy();
    stash.save("users", user("a", "a@x.com", 10)).await.unwrap();

    let hits = find_users(&stash, json!({"score": {"$gte": 0}})).await.unwrap();
    assert!(hits.is_empty());

    // Point reads are current, so the record itself is already there.
    assert!(stash.get("users", &rid("a")).await.is_ok());

    store.settle();
    let hits = find_users(&stash, json!({"score": {"$gte": 0}})).await.unwrap();
    assert_eq!(ids(&hits), set(&["a"]));
}

#[tokio::test]
async fn test_equality_lookups_do_not_wait_for_listing() {
    let (_store, stash) = laggy();
    stash
        .save("users", user("a", "a@x.com", 10).set("team", "red"))
        .await
        .unwrap();

    let hits = find_users(&stash, json!({"team": "red"})).await.unwrap();
    assert_eq!(ids(&hits), set(&["a"]));
}

#[tokio::test]
async fn test_ghost_entries_after_delete_are_ignored() {
    let (store, stash) = laggy();
    seed_scores(&stash).await;
    store.settle();

    stash.delete("users", &rid("2")).await.unwrap();
    stash.delete("users", &rid("4")).await.unwrap();

    let hits = find_users(&stash, json!({"score": {"$gte": 20, "$lte": 40}}))
        .await
        .unwrap();
    assert_eq!(ids(&hits), set(&["3"]));

    let all = stash.find("users", &FindOptions::new()).await.unwrap();
    assert_eq!(ids(&all), set(&["1", "3", "5"]));
}

#[tokio::test]
async fn test_index_entry_without_record_reads_as_absent() {
    let (store, stash) = laggy();
    seed_scores(&stash).await;
    store.settle();

    // Lose the record object but keep its index entries.
    assert!(store.delete(&record_key("users", "3")).await.unwrap());

    let hits = find_users(&stash, json!({"score": {"$gte": 20, "$lt": 40}}))
        .await
        .unwrap();
    assert_eq!(ids(&hits), set(&["2"]));
}
