//! The merged TOML tree and where each of its values came from.

use std::collections::HashMap;
use std::fmt;

/// Which configuration layer set a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayer {
    /// Compiled-in `defaults.toml`.
    Defaults,
    /// `~/.stash/config.toml`.
    User,
    /// The file given with `--config`.
    Explicit,
    /// A `STASH_*` variable.
    Environment,
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Defaults => "defaults",
            Self::User => "user (~/.stash/config.toml)",
            Self::Explicit => "explicit file",
            Self::Environment => "environment variable",
        })
    }
}

/// Source layer of every leaf, keyed by dotted path (`store.bucket`).
pub type FieldSources = HashMap<String, ConfigLayer>;

/// A TOML tree built up layer by layer.
///
/// Tables merge key by key. Scalars and arrays are leaves: a later layer
/// replaces them outright, so `[[entities]]` in one file replaces the whole
/// entity list of the layers below it.
#[derive(Debug, Clone)]
pub struct LayeredTree {
    root: toml::Value,
    sources: FieldSources,
}

impl LayeredTree {
    /// Start from the default tree; every leaf is sourced to
    /// [`ConfigLayer::Defaults`].
    #[must_use]
    pub fn from_defaults(root: toml::Value) -> Self {
        let mut sources = FieldSources::new();
        mark(&root, &mut Vec::new(), ConfigLayer::Defaults, &mut sources);
        Self { root, sources }
    }

    /// Lay `overlay` over the tree.
    pub fn overlay(&mut self, overlay: toml::Value, layer: ConfigLayer) {
        let mut path = Vec::new();
        merge_into(&mut self.root, overlay, &mut path, layer, &mut self.sources);
    }

    /// Set one dotted path, creating missing tables on the way. Does nothing
    /// if a non-table value sits where a table is needed.
    pub fn set(&mut self, path: &str, value: toml::Value, layer: ConfigLayer) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(leaf) = segments.pop() else {
            return;
        };
        let mut node = &mut self.root;
        for segment in segments {
            let Some(table) = node.as_table_mut() else {
                return;
            };
            node = table
                .entry(segment)
                .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
        }
        if let Some(table) = node.as_table_mut() {
            table.insert(leaf.to_owned(), value);
            self.sources.insert(path.to_owned(), layer);
        }
    }

    /// Layer that last set `path`, if any.
    #[must_use]
    pub fn source_of(&self, path: &str) -> Option<ConfigLayer> {
        self.sources.get(path).copied()
    }

    /// Mutable access to the raw tree.
    pub fn root_mut(&mut self) -> &mut toml::Value {
        &mut self.root
    }

    /// Split into the merged tree and the source map.
    #[must_use]
    pub fn into_parts(self) -> (toml::Value, FieldSources) {
        (self.root, self.sources)
    }
}

fn merge_into(
    base: &mut toml::Value,
    overlay: toml::Value,
    path: &mut Vec<String>,
    layer: ConfigLayer,
    sources: &mut FieldSources,
) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                path.push(key.clone());
                match base_table.get_mut(&key) {
                    Some(existing) if existing.is_table() && value.is_table() => {
                        merge_into(existing, value, path, layer, sources);
                    },
                    _ => {
                        forget(path, sources);
                        mark(&value, path, layer, sources);
                        base_table.insert(key, value);
                    },
                }
                path.pop();
            }
        },
        (base, overlay) => {
            forget(path, sources);
            mark(&overlay, path, layer, sources);
            *base = overlay;
        },
    }
}

/// Drop sources at or below `path`; the subtree is about to be replaced.
fn forget(path: &[String], sources: &mut FieldSources) {
    let exact = path.join(".");
    let nested = format!("{exact}.");
    sources.retain(|k, _| *k != exact && !k.starts_with(&nested));
}

/// Record `layer` for every leaf under `value`.
fn mark(value: &toml::Value, path: &mut Vec<String>, layer: ConfigLayer, sources: &mut FieldSources) {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table {
                path.push(key.clone());
                mark(child, path, layer, sources);
                path.pop();
            }
        },
        _ if path.is_empty() => {},
        _ => {
            sources.insert(path.join("."), layer);
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> toml::Value {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn test_overlay_keeps_absent_keys() {
        let mut tree = LayeredTree::from_defaults(parse("[index]\nfan_out = 200\ncas_retries = 5"));
        tree.overlay(parse("[index]\nfan_out = 10"), ConfigLayer::User);

        assert_eq!(tree.source_of("index.fan_out"), Some(ConfigLayer::User));
        assert_eq!(tree.source_of("index.cas_retries"), Some(ConfigLayer::Defaults));
        let (root, _) = tree.into_parts();
        assert_eq!(root["index"]["fan_out"].as_integer(), Some(10));
        assert_eq!(root["index"]["cas_retries"].as_integer(), Some(5));
    }

    #[test]
    fn test_arrays_are_replaced_whole() {
        let mut tree =
            LayeredTree::from_defaults(parse("[logging]\ndirectives = [\"a=debug\", \"b=info\"]"));
        tree.overlay(parse("[logging]\ndirectives = [\"c=trace\"]"), ConfigLayer::Explicit);
        let (root, sources) = tree.into_parts();
        assert_eq!(root["logging"]["directives"].as_array().unwrap().len(), 1);
        assert_eq!(sources.get("logging.directives"), Some(&ConfigLayer::Explicit));
    }

    #[test]
    fn test_new_table_sources_every_leaf() {
        let mut tree = LayeredTree::from_defaults(parse("[store]\nbucket = \"stash\""));
        tree.overlay(
            parse("[store.credentials]\naccess_key_id = \"id\"\nsecret_access_key = \"s\""),
            ConfigLayer::User,
        );
        assert_eq!(
            tree.source_of("store.credentials.access_key_id"),
            Some(ConfigLayer::User)
        );
        assert_eq!(
            tree.source_of("store.credentials.secret_access_key"),
            Some(ConfigLayer::User)
        );
        assert_eq!(tree.source_of("store.bucket"), Some(ConfigLayer::Defaults));
    }

    #[test]
    fn test_set_creates_tables() {
        let mut tree = LayeredTree::from_defaults(toml::Value::Table(toml::map::Map::new()));
        tree.set(
            "store.credentials.secret_access_key",
            toml::Value::String("s3cr3t".into()),
            ConfigLayer::Environment,
        );
        assert_eq!(
            tree.source_of("store.credentials.secret_access_key"),
            Some(ConfigLayer::Environment)
        );
        let (root, _) = tree.into_parts();
        assert_eq!(
            root["store"]["credentials"]["secret_access_key"].as_str(),
            Some("s3cr3t")
        );
    }

    #[test]
    fn test_set_through_scalar_is_ignored() {
        let mut tree = LayeredTree::from_defaults(parse("store = \"flat\""));
        tree.set("store.bucket", toml::Value::String("b".into()), ConfigLayer::Environment);
        assert_eq!(tree.source_of("store.bucket"), None);
    }
}
