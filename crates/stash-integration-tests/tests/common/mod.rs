//! Shared helpers for integration tests.

use std::collections::BTreeSet;

use stash_core::{FindOptions, Record, Stash, StashResult, Where};
use stash_test::user;

/// Ids of `records`, sorted.
#[allow(dead_code)]
pub fn ids(records: &[Record]) -> BTreeSet<String> {
    records.iter().map(|r| r.id.as_str().to_owned()).collect()
}

/// Build an id set from string literals.
#[allow(dead_code)]
pub fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|id| (*id).to_owned()).collect()
}

/// Run a `users` query given in its JSON form.
#[allow(dead_code)]
pub async fn find_users(stash: &Stash, filter: serde_json::Value) -> StashResult<Vec<Record>> {
    let schema = stash.registry().get("users")?;
    let filter = Where::from_json(&schema, &filter)?;
    stash
        .find("users", &FindOptions::new().filter(filter))
        .await
}

/// Insert users `1..=5` with scores 10 through 50.
#[allow(dead_code)]
pub async fn seed_scores(stash: &Stash) {
    for n in 1..=5_i64 {
        let id = n.to_string();
        stash
            .save("users", user(&id, &format!("u{n}@x.com"), n * 10))
            .await
            .unwrap();
    }
}
