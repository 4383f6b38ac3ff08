//! Post-merge configuration validation.
//!
//! Checks that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges and that entity declarations are well formed.

use std::collections::HashSet;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{ColumnSection, Config, StoreBackend};

/// Widest numeric index domain, sign excluded.
pub const MAX_DOMAIN_DIGITS: u8 = 38;

/// Numeric index strategies this build knows about.
const ENGINES: &[&str] = &["basic"];

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_store(config)?;
    validate_index(config)?;
    validate_limits(config)?;
    validate_logging(config)?;
    validate_entities(config)?;
    Ok(())
}

fn validate_store(config: &Config) -> ConfigResult<()> {
    let s = &config.store;

    if s.bucket.trim().is_empty() {
        return Err(ConfigError::invalid("store.bucket", "bucket must not be empty"));
    }
    if s.bucket.contains('/') {
        return Err(ConfigError::invalid(
            "store.bucket",
            format!("bucket '{}' must not contain '/'", s.bucket),
        ));
    }
    if s.prefix.contains('\0') || s.prefix.starts_with('/') {
        return Err(ConfigError::invalid(
            "store.prefix",
            "prefix must not start with '/' or contain NUL bytes",
        ));
    }

    if let Some(raw) = &s.root_url {
        let url = url::Url::parse(raw).map_err(|e| {
            ConfigError::invalid("store.root_url", format!("'{raw}' is not a valid URL: {e}"))
        })?;
        if s.backend == StoreBackend::Fs && url.scheme() != "file" {
            return Err(ConfigError::invalid(
                "store.root_url",
                format!("fs backend needs a file:// URL, got scheme '{}'", url.scheme()),
            ));
        }
    }

    if s.backend == StoreBackend::Fs && s.root_url.is_none() && s.data_dir.is_none() {
        return Err(ConfigError::invalid(
            "store.data_dir",
            "fs backend needs store.data_dir or a file:// store.root_url",
        ));
    }

    let creds = &s.credentials;
    if creds.access_key_id.is_some() != creds.secret_access_key.is_some() {
        return Err(ConfigError::invalid(
            "store.credentials",
            "access_key_id and secret_access_key must be set together",
        ));
    }

    Ok(())
}

fn validate_index(config: &Config) -> ConfigResult<()> {
    let i = &config.index;

    let engine = i.engine.trim().to_ascii_lowercase();
    if !ENGINES.contains(&engine.as_str()) {
        return Err(ConfigError::invalid(
            "index.engine",
            format!(
                "unsupported engine '{}'; expected one of: {}",
                i.engine,
                ENGINES.join(", ")
            ),
        ));
    }

    if i.fan_out == 0 {
        return Err(ConfigError::invalid("index.fan_out", "fan_out must be at least 1"));
    }
    if i.max_list_calls == 0 {
        return Err(ConfigError::invalid(
            "index.max_list_calls",
            "max_list_calls must be at least 1",
        ));
    }

    check_domain("index.integer_digits", i.integer_digits, 0)?;
    check_domain("index.float_integer_digits", i.float_integer_digits, i.fraction_digits)?;
    check_domain("index.date_digits", i.date_digits, 0)?;

    Ok(())
}

fn validate_limits(config: &Config) -> ConfigResult<()> {
    if config.concurrency.max_in_flight == 0 {
        return Err(ConfigError::invalid(
            "concurrency.max_in_flight",
            "max_in_flight must be at least 1",
        ));
    }
    if config.timeouts.call_ms == 0 {
        return Err(ConfigError::invalid("timeouts.call_ms", "call_ms must be at least 1"));
    }

    let r = &config.retry;
    if r.max_attempts == 0 {
        return Err(ConfigError::invalid(
            "retry.max_attempts",
            "max_attempts must be at least 1",
        ));
    }
    if r.initial_delay_ms > r.max_delay_ms {
        return Err(ConfigError::invalid(
            "retry.initial_delay_ms",
            format!(
                "initial_delay_ms ({}) exceeds max_delay_ms ({})",
                r.initial_delay_ms, r.max_delay_ms
            ),
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !matches!(
        l.level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(ConfigError::invalid(
            "logging.level",
            format!(
                "unsupported level '{}'; expected one of: trace, debug, info, warn, error",
                l.level
            ),
        ));
    }
    if !matches!(
        l.format.to_ascii_lowercase().as_str(),
        "pretty" | "compact" | "json" | "full"
    ) {
        return Err(ConfigError::invalid(
            "logging.format",
            format!(
                "unsupported format '{}'; expected one of: pretty, compact, json, full",
                l.format
            ),
        ));
    }
    Ok(())
}

fn validate_entities(config: &Config) -> ConfigResult<()> {
    let mut names = HashSet::new();

    for (i, entity) in config.entities.iter().enumerate() {
        let field = format!("entities[{i}]");
        check_identifier(&format!("{field}.name"), &entity.name)?;
        if !names.insert(entity.name.as_str()) {
            return Err(ConfigError::invalid(
                format!("{field}.name"),
                format!("entity '{}' is declared twice", entity.name),
            ));
        }
        if entity.expires_in_secs == Some(0) {
            return Err(ConfigError::invalid(
                format!("{field}.expires_in_secs"),
                "expires_in_secs must be at least 1",
            ));
        }

        let mut columns = HashSet::new();
        for (j, column) in entity.columns.iter().enumerate() {
            let field = format!("{field}.columns[{j}]");
            check_identifier(&format!("{field}.name"), &column.name)?;
            if !columns.insert(column.name.as_str()) {
                return Err(ConfigError::invalid(
                    format!("{field}.name"),
                    format!("column '{}' is declared twice", column.name),
                ));
            }
            validate_column(&field, column)?;
        }
    }
    Ok(())
}

fn validate_column(field: &str, column: &ColumnSection) -> ConfigResult<()> {
    if column.ty.trim().is_empty() {
        return Err(ConfigError::invalid(format!("{field}.type"), "type must not be empty"));
    }

    let numeric = matches!(column.ty.as_str(), "integer" | "float" | "date");
    if !numeric && (column.integer_digits.is_some() || column.fraction_digits.is_some()) {
        return Err(ConfigError::invalid(
            format!("{field}.integer_digits"),
            format!("digit widths only apply to numeric columns, not '{}'", column.ty),
        ));
    }
    if column.ty != "float" && column.fraction_digits.is_some_and(|d| d > 0) {
        return Err(ConfigError::invalid(
            format!("{field}.fraction_digits"),
            "only float columns carry fraction digits",
        ));
    }
    if let Some(int) = column.integer_digits {
        check_domain(
            &format!("{field}.integer_digits"),
            int,
            column.fraction_digits.unwrap_or(0),
        )?;
    }
    Ok(())
}

fn check_domain(field: &str, integer_digits: u8, fraction_digits: u8) -> ConfigResult<()> {
    let width = u16::from(integer_digits).saturating_add(u16::from(fraction_digits));
    if width == 0 || width > u16::from(MAX_DOMAIN_DIGITS) {
        return Err(ConfigError::invalid(
            field,
            format!("digit width {width} must be between 1 and {MAX_DOMAIN_DIGITS}"),
        ));
    }
    Ok(())
}

/// Identifiers start with an ASCII letter or `_` and continue with ASCII
/// alphanumerics, `_` or `-`.
fn check_identifier(field: &str, name: &str) -> ConfigResult<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("invalid identifier '{name}'")))
    }
}
