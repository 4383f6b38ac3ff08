//! Object key layout.
//!
//! ```text
//! {entity}/.records/{id}                  record object
//! {entity}/{column}/{value}               unique pointer -> owner id
//! {entity}/{column}/eq/{value}            equality index leaf
//! {entity}/{column}/index/{canonical}     numeric index leaf
//! {leaf}~{n}                              overflow shard n of a leaf
//! ```
//!
//! Ids and encoded values are form-urlencoded so they never contain `/` or
//! `~`, which keeps every key family unambiguous.

/// Separator between a leaf key and its overflow shard number.
pub(crate) const SHARD_SEPARATOR: char = '~';

/// Escape an id or encoded value into a single key segment.
#[must_use]
pub fn escape(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

/// Reverse [`escape`].
#[must_use]
pub fn unescape(segment: &str) -> String {
    url::form_urlencoded::parse(segment.as_bytes())
        .next()
        .map(|(k, _)| k.into_owned())
        .unwrap_or_default()
}

/// Prefix shared by all record objects of an entity.
#[must_use]
pub fn records_prefix(entity: &str) -> String {
    format!("{entity}/.records/")
}

/// Key of a record object.
#[must_use]
pub fn record_key(entity: &str, id: &str) -> String {
    format!("{entity}/.records/{}", escape(id))
}

/// Key of a unique-value pointer.
#[must_use]
pub fn unique_key(entity: &str, column: &str, encoded: &str) -> String {
    format!("{entity}/{column}/{}", escape(encoded))
}

/// Key of an equality index leaf.
#[must_use]
pub fn equality_key(entity: &str, column: &str, encoded: &str) -> String {
    format!("{entity}/{column}/eq/{}", escape(encoded))
}

/// Prefix shared by all numeric leaves of a column.
#[must_use]
pub fn numeric_prefix(entity: &str, column: &str) -> String {
    format!("{entity}/{column}/index/")
}

/// Key of a numeric index leaf.
#[must_use]
pub fn numeric_key(entity: &str, column: &str, canonical: &str) -> String {
    format!("{entity}/{column}/index/{canonical}")
}

/// Key of overflow shard `n` (1-based) of a leaf.
#[must_use]
pub fn shard_key(leaf: &str, n: u32) -> String {
    format!("{leaf}{SHARD_SEPARATOR}{n}")
}
