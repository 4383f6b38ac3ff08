//! Why a configuration could not be loaded.

use std::io;

use thiserror::Error;

/// A configuration that could not be read, parsed or accepted.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file exists but could not be read, or an explicit file is
    /// missing.
    #[error("cannot read {path}: {source}")]
    Unreadable {
        /// File path.
        path: String,
        /// I/O failure.
        #[source]
        source: io::Error,
    },

    /// A file, or the merged tree, is not valid TOML for the config types.
    #[error("malformed config in {path}: {source}")]
    Malformed {
        /// File path, or `<merged config>` for the layered result.
        path: String,
        /// TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A config file above the size cap.
    #[error("{path} is {size} bytes, config files are capped at {limit}")]
    TooLarge {
        /// File path.
        path: String,
        /// Actual size in bytes.
        size: u64,
        /// Cap in bytes.
        limit: u64,
    },

    /// A field holds a value Stash cannot use.
    #[error("{field}: {message}")]
    Invalid {
        /// Dotted field path, e.g. `index.fan_out`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A `STASH_*` count variable that is not a non-negative integer.
    #[error("{var} must be a non-negative integer, got '{raw}'")]
    BadEnvCount {
        /// Variable name.
        var: &'static str,
        /// Value as set.
        raw: String,
    },

    /// No home directory to find `~/.stash` in.
    #[error("no home directory; pass --config instead")]
    NoHomeDir,
}

/// Result alias for this crate.
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}
