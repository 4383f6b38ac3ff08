//! Bridge from `stash_config::Config` to domain types.
//!
//! The config crate has no dependencies on other internal crates. This
//! module translates its sections into schemas, index settings, store
//! wrappers and log settings, in one place.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use stash_config::{ColumnSection, Config, EntitySection, StoreBackend, StoreSection};
use stash_core::{
    ColumnSchema, ColumnType, EntitySchema, IndexSettings, IndexingEngine, NumericDomain,
    SchemaRegistry, Stash, StashSettings,
};
use stash_store::{
    FsObjectStore, MemoryObjectStore, ObjectStore, PrefixedStore, ResilienceConfig,
    ResilientStore, RetryPolicy,
};
use stash_telemetry::{LogConfig, LogFormat};
use tracing::debug;

/// Convert the `[logging]` section to a [`LogConfig`].
#[must_use]
pub fn to_log_config(cfg: &Config) -> LogConfig {
    let format = cfg
        .logging
        .format
        .parse::<LogFormat>()
        .unwrap_or(LogFormat::Compact);

    let mut log_config = LogConfig::new(&cfg.logging.level).with_format(format);
    for directive in &cfg.logging.directives {
        log_config = log_config.with_directive(directive);
    }
    log_config
}

/// Convert `[retry]`, `[timeouts]` and `[concurrency]` to a
/// [`ResilienceConfig`].
#[must_use]
pub fn to_resilience_config(cfg: &Config) -> ResilienceConfig {
    let retry = RetryPolicy::new(
        cfg.retry.max_attempts,
        Duration::from_millis(cfg.retry.initial_delay_ms),
        Duration::from_millis(cfg.retry.max_delay_ms),
    )
    .with_jitter(cfg.retry.jitter);

    ResilienceConfig {
        retry,
        call_timeout: Duration::from_millis(cfg.timeouts.call_ms),
        max_in_flight: cfg.concurrency.max_in_flight,
    }
}

/// Convert `[index]` and `[concurrency]` to [`IndexSettings`].
///
/// # Errors
///
/// Fails if a configured digit width is not a valid domain.
pub fn to_index_settings(cfg: &Config) -> Result<IndexSettings> {
    let i = &cfg.index;
    Ok(IndexSettings {
        fan_out: i.fan_out,
        max_list_calls: i.max_list_calls,
        cas_retries: i.cas_retries,
        max_in_flight: cfg.concurrency.max_in_flight,
        integer_domain: NumericDomain::new(i.integer_digits, 0)?,
        float_domain: NumericDomain::new(i.float_integer_digits, i.fraction_digits)?,
        date_domain: NumericDomain::new(i.date_digits, 0)?,
    })
}

/// Convert the configuration to [`StashSettings`].
///
/// # Errors
///
/// Fails for an unknown engine name or invalid digit widths.
pub fn to_stash_settings(cfg: &Config) -> Result<StashSettings> {
    Ok(StashSettings {
        engine: cfg.index.engine.parse::<IndexingEngine>()?,
        index: to_index_settings(cfg)?,
    })
}

/// Build the schema registry from `[[entities]]`.
///
/// # Errors
///
/// Fails if a declared entity or column does not validate.
pub fn to_registry(cfg: &Config) -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    for entity in &cfg.entities {
        let schema =
            to_entity(entity).with_context(|| format!("entity '{}'", entity.name))?;
        registry.register(schema)?;
    }
    Ok(registry)
}

fn to_entity(section: &EntitySection) -> Result<EntitySchema> {
    let mut schema = EntitySchema::new(&section.name).timestamps(section.timestamps);
    if let Some(secs) = section.expires_in_secs {
        schema = schema.expires_in(Duration::from_secs(secs));
    }
    for column in &section.columns {
        schema = schema.column(
            to_column(column).with_context(|| format!("column '{}'", column.name))?,
        );
    }
    Ok(schema)
}

fn to_column(section: &ColumnSection) -> Result<ColumnSchema> {
    let ty = ColumnType::parse(&section.ty);
    let mut column = ColumnSchema::new(&section.name, ty.clone());
    if section.unique {
        column = column.unique();
    } else if section.index {
        column = column.indexed();
    }

    if section.integer_digits.is_some() || section.fraction_digits.is_some() {
        let Some(fallback) = NumericDomain::default_for(&ty) else {
            bail!("digit widths need a numeric type, got '{}'", section.ty);
        };
        column = column.with_domain(NumericDomain::new(
            section.integer_digits.unwrap_or(fallback.integer_digits),
            section.fraction_digits.unwrap_or(fallback.fraction_digits),
        )?);
    }

    if let Some(default) = &section.default {
        let json = serde_json::to_value(default).context("default is not representable")?;
        let value = column.value_from_json(&json)?;
        column = column.with_default(value);
    }
    Ok(column)
}

/// Filesystem backend root: a `file://` root URL, else `data_dir`, joined
/// with the bucket name.
///
/// # Errors
///
/// Fails if neither location is set or the URL is not a local path.
pub fn fs_root(store: &StoreSection) -> Result<PathBuf> {
    let base = if let Some(raw) = &store.root_url {
        let parsed = url::Url::parse(raw).with_context(|| format!("store.root_url '{raw}'"))?;
        parsed
            .to_file_path()
            .map_err(|()| anyhow::anyhow!("store.root_url '{raw}' is not a local path"))?
    } else if let Some(dir) = &store.data_dir {
        dir.clone()
    } else {
        bail!("the fs backend needs store.data_dir or a file:// store.root_url");
    };
    Ok(base.join(&store.bucket))
}

/// Open the configured store: backend, resilience wrapper, then prefix.
///
/// # Errors
///
/// Fails if the backend cannot be opened or the prefix is invalid.
pub fn open_store(cfg: &Config) -> Result<Arc<dyn ObjectStore>> {
    let resilience = to_resilience_config(cfg);
    let store: Arc<dyn ObjectStore> = match cfg.store.backend {
        StoreBackend::Memory => {
            Arc::new(ResilientStore::new(MemoryObjectStore::new(), resilience))
        },
        StoreBackend::Fs => {
            let root = fs_root(&cfg.store)?;
            debug!(root = %root.display(), "opening filesystem store");
            let fs = FsObjectStore::open(&root)
                .with_context(|| format!("opening store at {}", root.display()))?;
            Arc::new(ResilientStore::new(fs, resilience))
        },
    };

    if cfg.store.prefix.is_empty() {
        Ok(store)
    } else {
        Ok(Arc::new(PrefixedStore::new(store, &cfg.store.prefix)?))
    }
}

/// Build a ready [`Stash`] from configuration.
///
/// # Errors
///
/// Fails if the store cannot be opened or the schemas do not validate.
pub fn build_stash(cfg: &Config) -> Result<Stash> {
    let store = open_store(cfg)?;
    let registry = to_registry(cfg)?;
    let settings = to_stash_settings(cfg)?;
    Ok(Stash::new(store, registry, settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_entities(toml_src: &str) -> Config {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn test_to_log_config() {
        let mut cfg = Config::default();
        cfg.logging.level = "debug".to_owned();
        cfg.logging.format = "json".to_owned();
        cfg.logging.directives = vec!["stash_core=trace".to_owned()];

        let log = to_log_config(&cfg);
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.directives, vec!["stash_core=trace"]);
    }

    #[test]
    fn test_to_resilience_config() {
        let mut cfg = Config::default();
        cfg.retry.max_attempts = 7;
        cfg.timeouts.call_ms = 250;
        let r = to_resilience_config(&cfg);
        assert_eq!(r.retry.max_attempts, 7);
        assert!(r.retry.jitter);
        assert_eq!(r.call_timeout, Duration::from_millis(250));
        assert_eq!(r.max_in_flight, 32);
    }

    #[test]
    fn test_to_stash_settings() {
        let mut cfg = Config::default();
        cfg.index.fan_out = 7;
        cfg.index.fraction_digits = 2;
        let settings = to_stash_settings(&cfg).unwrap();
        assert_eq!(settings.engine, IndexingEngine::Basic);
        assert_eq!(settings.index.fan_out, 7);
        assert_eq!(settings.index.float_domain.fraction_digits, 2);
        assert_eq!(settings.index.float_domain.integer_digits, 15);

        cfg.index.engine = "btree".to_owned();
        assert!(to_stash_settings(&cfg).is_err());
    }

    #[test]
    fn test_to_registry() {
        let cfg = config_with_entities(
            r#"
            [[entities]]
            name = "users"
            expires_in_secs = 60

            [[entities.columns]]
            name = "email"
            type = "string"
            unique = true

            [[entities.columns]]
            name = "balance"
            type = "float"
            index = true
            default = 0.5
            fraction_digits = 2

            [[entities.columns]]
            name = "profile"
            type = "avatar"
            "#,
        );
        let registry = to_registry(&cfg).unwrap();
        let users = registry.get("users").unwrap();

        let email = users.get_column("email").unwrap();
        assert!(email.unique && email.index);

        let balance = users.get_column("balance").unwrap();
        assert!(balance.is_range_indexed());
        assert_eq!(
            balance.domain,
            Some(NumericDomain {
                integer_digits: 15,
                fraction_digits: 2
            })
        );
        assert_eq!(balance.default, Some(stash_core::Value::Float(0.5)));

        let profile = users.get_column("profile").unwrap();
        assert_eq!(profile.ty, ColumnType::Custom("avatar".to_owned()));
    }

    #[test]
    fn test_bad_default_is_reported() {
        let cfg = config_with_entities(
            r#"
            [[entities]]
            name = "users"
            [[entities.columns]]
            name = "score"
            type = "integer"
            default = "high"
            "#,
        );
        let err = to_registry(&cfg).unwrap_err();
        assert!(format!("{err:#}").contains("column 'score'"));
    }

    #[test]
    fn test_fs_root() {
        let mut store = StoreSection {
            bucket: "b".to_owned(),
            ..StoreSection::default()
        };
        assert!(fs_root(&store).is_err());

        store.data_dir = Some(PathBuf::from("/srv/data"));
        assert_eq!(fs_root(&store).unwrap(), PathBuf::from("/srv/data/b"));

        store.root_url = Some("file:///mnt/objects".to_owned());
        assert_eq!(fs_root(&store).unwrap(), PathBuf::from("/mnt/objects/b"));
    }

    #[tokio::test]
    async fn test_build_stash_over_fs() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_with_entities(
            r#"
            [store]
            backend = "fs"
            bucket = "test"
            prefix = "app"

            [[entities]]
            name = "notes"
            [[entities.columns]]
            name = "rank"
            type = "integer"
            index = true
            "#,
        );
        cfg.store.data_dir = Some(dir.path().to_path_buf());

        let stash = build_stash(&cfg).unwrap();
        let saved = stash
            .save("notes", stash_core::RecordData::new().set("rank", 3))
            .await
            .unwrap();
        let loaded = stash.get("notes", &saved.id).await.unwrap();
        assert_eq!(loaded.get("rank"), &stash_core::Value::Integer(3));
        assert!(dir.path().join("test").exists());
    }
}
