//! Why logging could not be set up.

use thiserror::Error;

/// A rejected logging setting or a failed subscriber install.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// `level` is not one of off, error, warn, info, debug, trace.
    #[error("invalid log level '{0}'")]
    InvalidLevel(String),

    /// A `target=level` directive did not parse.
    #[error("bad log directive '{directive}': {reason}")]
    InvalidDirective {
        /// The directive as written.
        directive: String,
        /// Parser message.
        reason: String,
    },

    /// Unrecognised output format name.
    #[error("unknown log format '{0}', expected pretty, compact, json or full")]
    UnknownFormat(String),

    /// Another global subscriber is already installed.
    #[error("logging already initialised: {0}")]
    AlreadyInstalled(String),
}

/// Result alias for this crate.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
