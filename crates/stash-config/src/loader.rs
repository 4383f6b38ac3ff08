//! Finding config files and stacking them.
//!
//! Order, lowest first: the embedded `defaults.toml`, `~/.stash/config.toml`,
//! the `--config` file, then `STASH_*` variables for whatever no file set.
//! `${VAR}` references are expanded last, after which the tree is
//! deserialized and validated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars, resolve_env_references};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, LayeredTree};
use crate::show::ResolvedConfig;
use crate::types::Config;
use crate::validate;

const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Config files larger than this are refused.
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Load the layered configuration.
///
/// `explicit` must exist; the user file is optional. `home_override`
/// stands in for `~/.stash`.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is unreadable or malformed,
/// or if the merged configuration fails validation.
pub fn load(explicit: Option<&Path>, home_override: Option<&Path>) -> ConfigResult<ResolvedConfig> {
    load_with_env(explicit, home_override, &collect_env_vars())
}

pub(crate) fn load_with_env(
    explicit: Option<&Path>,
    home_override: Option<&Path>,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<ResolvedConfig> {
    let defaults = toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::Malformed {
        path: "<embedded defaults>".to_owned(),
        source: e,
    })?;
    let mut tree = LayeredTree::from_defaults(defaults);

    let user_path = match home_override {
        Some(dir) => dir.join("config.toml"),
        None => home_directory()?.join(".stash").join("config.toml"),
    };
    let mut files: Vec<(PathBuf, toml::Value, ConfigLayer)> = Vec::new();
    if let Some(value) = try_load_file(&user_path)? {
        files.push((user_path, value, ConfigLayer::User));
    }
    if let Some(path) = explicit {
        files.push((path.to_path_buf(), read_file(path)?, ConfigLayer::Explicit));
    }

    let mut loaded_files = Vec::with_capacity(files.len());
    for (path, value, layer) in files {
        tree.overlay(value, layer);
        info!(path = %path.display(), %layer, "loaded config file");
        loaded_files.push(path.display().to_string());
    }

    let from_env = apply_env_fallbacks(&mut tree, env_vars)?;
    if from_env > 0 {
        debug!(count = from_env, "filled fields from environment");
    }
    resolve_env_references(tree.root_mut(), env_vars);

    let (merged, field_sources) = tree.into_parts();
    let config: Config = merged
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Malformed {
            path: "<merged config>".to_owned(),
            source: e,
        })?;
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a config from a specific file path (no layering).
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed or fails
/// validation.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let value = read_file(path)?;
    let config: Config = value
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Malformed {
            path: path.display().to_string(),
            source: e,
        })?;

    validate::validate(&config)?;
    Ok(config)
}

/// Read a file that must exist.
fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    match try_load_file(path)? {
        Some(value) => Ok(value),
        None => Err(ConfigError::Unreadable {
            path: path.display().to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }),
    }
}

/// Try to load a file, returning `None` if the file doesn't exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::Unreadable {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    let size = u64::try_from(content.len()).unwrap_or(u64::MAX);
    if size > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::TooLarge {
            path: path.display().to_string(),
            size,
            limit: MAX_CONFIG_FILE_SIZE,
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::Malformed {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(Some(value))
}

/// Determine the user's home directory.
fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StoreBackend;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_defaults_deserialize_to_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config.index.engine, "basic");
        assert_eq!(config.index.fan_out, 200);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.entities.is_empty());
        assert!(validate::validate(&config).is_ok());
    }

    #[test]
    fn test_rust_defaults_match_embedded_defaults() {
        let embedded: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(
            toml::Value::try_from(&embedded).unwrap(),
            toml::Value::try_from(Config::default()).unwrap()
        );
        assert_eq!(Config::default().store.bucket, "stash");
        assert!(validate::validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_layers_and_sources() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(
            home.path().join("config.toml"),
            "[store]\nbucket = \"user-bucket\"\nprefix = \"team\"\n",
        )
        .unwrap();
        let explicit = home.path().join("explicit.toml");
        std::fs::write(
            &explicit,
            r#"
            [index]
            fan_out = 50

            [store]
            bucket = "explicit-bucket"

            [[entities]]
            name = "users"
            [[entities.columns]]
            name = "score"
            type = "integer"
            index = true
            "#,
        )
        .unwrap();

        let resolved = load_with_env(
            Some(&explicit),
            Some(home.path()),
            &env(&[("STASH_PREFIX", "ignored"), ("STASH_REGION", "eu-west-1")]),
        )
        .unwrap();
        let config = &resolved.config;

        assert_eq!(config.store.bucket, "explicit-bucket");
        assert_eq!(config.store.prefix, "team");
        assert_eq!(config.store.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.index.fan_out, 50);
        assert_eq!(config.index.cas_retries, 5);
        assert_eq!(config.entities[0].columns[0].name, "score");

        let sources = &resolved.field_sources;
        assert_eq!(sources.get("store.bucket"), Some(&ConfigLayer::Explicit));
        assert_eq!(sources.get("store.prefix"), Some(&ConfigLayer::User));
        assert_eq!(sources.get("store.region"), Some(&ConfigLayer::Environment));
        assert_eq!(sources.get("index.cas_retries"), Some(&ConfigLayer::Defaults));
        assert_eq!(resolved.loaded_files.len(), 2);
    }

    #[test]
    fn test_missing_user_file_is_skipped() {
        let home = tempfile::tempdir().unwrap();
        let resolved = load_with_env(None, Some(home.path()), &HashMap::new()).unwrap();
        assert!(resolved.loaded_files.is_empty());
        assert_eq!(resolved.config.store.bucket, "stash");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let home = tempfile::tempdir().unwrap();
        let result = load_with_env(
            Some(&home.path().join("nope.toml")),
            Some(home.path()),
            &HashMap::new(),
        );
        assert!(matches!(result, Err(ConfigError::Unreadable { .. })));
    }

    #[test]
    fn test_env_engine_is_validated() {
        let home = tempfile::tempdir().unwrap();
        let result = load_with_env(
            None,
            Some(home.path()),
            &env(&[("STASH_INDEXING_ENGINE", "quadtree")]),
        );
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { ref field, .. }) if field == "index.engine"
        ));
    }

    #[test]
    fn test_env_reference_with_fallback() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(
            home.path().join("config.toml"),
            "[store]\nbucket = \"${TEAM:-shared}-records\"\n",
        )
        .unwrap();
        let resolved = load_with_env(None, Some(home.path()), &HashMap::new()).unwrap();
        assert_eq!(resolved.config.store.bucket, "shared-records");
    }

    #[test]
    fn test_env_count_must_be_numeric() {
        let home = tempfile::tempdir().unwrap();
        let result = load_with_env(
            None,
            Some(home.path()),
            &env(&[("STASH_MAX_IN_FLIGHT", "-3")]),
        );
        assert!(matches!(
            result,
            Err(ConfigError::BadEnvCount { var: "STASH_MAX_IN_FLIGHT", .. })
        ));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[store\nbucket = ").unwrap();
        assert!(matches!(
            load_file(&path),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn test_oversized_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&file_path, data).unwrap();

        let result = try_load_file(&file_path);
        assert!(
            matches!(result, Err(ConfigError::TooLarge { limit: MAX_CONFIG_FILE_SIZE, .. })),
            "{result:?}"
        );
    }
}
