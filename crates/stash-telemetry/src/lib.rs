//! Stash Telemetry - logging setup for the stash crates and binary.
//!
//! # Example
//!
//! ```rust,no_run
//! use stash_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), stash_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Json)
//!     .with_directive("stash_core=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, STASH_TARGETS, setup_logging};
