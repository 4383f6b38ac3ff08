//! `STASH_*` environment fallbacks and `${VAR}` references.
//!
//! A variable only fills a field that is still at its compiled-in default;
//! anything a config file set wins.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, LayeredTree};

/// How a variable's text becomes a TOML value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Text,
    Count,
}

/// `(variable, dotted field, kind)`.
const FALLBACKS: &[(&str, &str, Kind)] = &[
    ("STASH_BACKEND", "store.backend", Kind::Text),
    ("STASH_BUCKET", "store.bucket", Kind::Text),
    ("STASH_PREFIX", "store.prefix", Kind::Text),
    ("STASH_REGION", "store.region", Kind::Text),
    ("STASH_ROOT_URL", "store.root_url", Kind::Text),
    ("STASH_DATA_DIR", "store.data_dir", Kind::Text),
    ("STASH_ACCESS_KEY_ID", "store.credentials.access_key_id", Kind::Text),
    (
        "STASH_SECRET_ACCESS_KEY",
        "store.credentials.secret_access_key",
        Kind::Text,
    ),
    ("STASH_INDEXING_ENGINE", "index.engine", Kind::Text),
    ("STASH_FAN_OUT", "index.fan_out", Kind::Count),
    ("STASH_MAX_IN_FLIGHT", "concurrency.max_in_flight", Kind::Count),
    ("STASH_LOG_LEVEL", "logging.level", Kind::Text),
];

/// Fill default-sourced fields from `env`. Returns how many were applied.
///
/// # Errors
///
/// Returns [`ConfigError::BadEnvCount`] when a count variable does not
/// parse.
pub fn apply_env_fallbacks<S: std::hash::BuildHasher>(
    tree: &mut LayeredTree,
    env: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut applied = 0_usize;
    for &(var, field, kind) in FALLBACKS {
        let Some(raw) = env.get(var) else {
            continue;
        };
        if tree
            .source_of(field)
            .is_some_and(|layer| layer != ConfigLayer::Defaults)
        {
            debug!(var, field, "config file wins over environment");
            continue;
        }
        let value = match kind {
            Kind::Text => toml::Value::String(raw.clone()),
            Kind::Count => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|n| *n >= 0)
                .map(toml::Value::Integer)
                .ok_or_else(|| ConfigError::BadEnvCount {
                    var,
                    raw: raw.clone(),
                })?,
        };
        tree.set(field, value, ConfigLayer::Environment);
        applied = applied.saturating_add(1);
    }
    Ok(applied)
}

/// Expand `${VAR}` and `${VAR:-fallback}` inside every string of the tree.
///
/// An unset variable without a fallback is left as written.
pub fn resolve_env_references<S: std::hash::BuildHasher>(
    value: &mut toml::Value,
    env: &HashMap<String, String, S>,
) {
    match value {
        toml::Value::String(s) if s.contains("${") => *s = expand(s, env),
        toml::Value::Table(table) => {
            for (_, child) in table.iter_mut() {
                resolve_env_references(child, env);
            }
        },
        toml::Value::Array(items) => {
            for child in items {
                resolve_env_references(child, env);
            }
        },
        _ => {},
    }
}

fn expand<S: std::hash::BuildHasher>(input: &str, env: &HashMap<String, String, S>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start.saturating_add(2)..];
        let Some(end) = after.find('}') else {
            // Unterminated: keep the remainder verbatim.
            out.push_str(&rest[start..]);
            return out;
        };
        let reference = &after[..end];
        let (name, fallback) = match reference.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (reference, None),
        };
        match (env.get(name), fallback) {
            (Some(value), _) if !name.is_empty() => out.push_str(value),
            (_, Some(fallback)) => out.push_str(fallback),
            _ => {
                debug!(var = name, "unresolved reference in config");
                out.push_str(&rest[start..start.saturating_add(end).saturating_add(3)]);
            },
        }
        rest = &after[end.saturating_add(1)..];
    }
    out.push_str(rest);
    out
}

/// Snapshot of the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}
