//! Subscriber setup.
//!
//! `level` applies to the Stash crates themselves. Everything else (tokio,
//! the store backends' dependencies) is capped at `warn` so a `debug` run
//! shows index and query decisions without runtime noise. Directives are
//! applied last and can open up any target.

use std::str::FromStr;

use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::error::{TelemetryError, TelemetryResult};

/// Tracing targets that follow the configured level.
pub const STASH_TARGETS: &[&str] = &[
    "stash",
    "stash_cli",
    "stash_config",
    "stash_core",
    "stash_store",
];

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for reading a single query's trace.
    Pretty,
    /// One short line per event.
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
    /// One line per event with every span field.
    Full,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            "full" => Ok(Self::Full),
            other => Err(TelemetryError::UnknownFormat(other.to_owned())),
        }
    }
}

/// Where log lines go.
///
/// The CLI prints records on stdout, so it logs to stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogTarget {
    /// Standard output.
    Stdout,
    /// Standard error.
    #[default]
    Stderr,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Level for the Stash crates, e.g. `warn` or `debug`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Output stream.
    pub target: LogTarget,
    /// Prefix events with a timestamp.
    pub timestamps: bool,
    /// Include source file and line.
    pub file_info: bool,
    /// Colour output.
    pub ansi: bool,
    /// Extra `target=level` directives, applied after `level`.
    pub directives: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("warn")
    }
}

impl LogConfig {
    /// Settings at `level` with compact output on stderr.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            format: LogFormat::Compact,
            target: LogTarget::Stderr,
            timestamps: true,
            file_info: false,
            ansi: true,
            directives: Vec::new(),
        }
    }

    /// Use `format`.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Write to `target`.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// Append a `target=level` directive.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Drop timestamps, e.g. when a supervisor adds its own.
    #[must_use]
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    fn level_filter(&self) -> TelemetryResult<LevelFilter> {
        self.level
            .trim()
            .parse::<LevelFilter>()
            .map_err(|_| TelemetryError::InvalidLevel(self.level.clone()))
    }

    fn build_filter(&self) -> TelemetryResult<EnvFilter> {
        let level = self.level_filter()?;
        let mut filter = EnvFilter::try_new(level.min(LevelFilter::WARN).to_string())
            .map_err(|_| TelemetryError::InvalidLevel(self.level.clone()))?;
        let name = level.to_string().to_ascii_lowercase();
        for target in STASH_TARGETS {
            filter = filter.add_directive(parse_directive(&format!("{target}={name}"))?);
        }
        for directive in &self.directives {
            filter = filter.add_directive(parse_directive(directive)?);
        }
        Ok(filter)
    }
}

fn parse_directive(raw: &str) -> TelemetryResult<Directive> {
    raw.parse()
        .map_err(|e: tracing_subscriber::filter::ParseError| TelemetryError::InvalidDirective {
            directive: raw.to_owned(),
            reason: e.to_string(),
        })
}

fn fmt_layer<W>(config: &LogConfig, writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(config.ansi && config.format != LogFormat::Json)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    match (config.format, config.timestamps) {
        (LogFormat::Json, true) => layer.json().boxed(),
        (LogFormat::Json, false) => layer.json().without_time().boxed(),
        (LogFormat::Pretty, true) => layer.pretty().boxed(),
        (LogFormat::Pretty, false) => layer.pretty().without_time().boxed(),
        (LogFormat::Compact, true) => layer.compact().boxed(),
        (LogFormat::Compact, false) => layer.compact().without_time().boxed(),
        (LogFormat::Full, true) => layer.boxed(),
        (LogFormat::Full, false) => layer.without_time().boxed(),
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails on an invalid level or directive, or with
/// [`TelemetryError::AlreadyInstalled`] if a subscriber is already set.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.build_filter()?;
    let layer = match config.target {
        LogTarget::Stdout => fmt_layer(config, std::io::stdout),
        LogTarget::Stderr => fmt_layer(config, std::io::stderr),
    };
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "warn");
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.target, LogTarget::Stderr);
        assert!(config.timestamps && config.ansi);
        assert!(config.directives.is_empty());
    }

    #[test]
    fn test_builders() {
        let config = LogConfig::new("debug")
            .with_format(LogFormat::Json)
            .with_target(LogTarget::Stdout)
            .without_timestamps()
            .with_directive("stash_core::index=trace");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.target, LogTarget::Stdout);
        assert!(!config.timestamps);
        assert_eq!(config.directives, vec!["stash_core::index=trace"]);
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!(" JSON ".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("full".parse::<LogFormat>().unwrap(), LogFormat::Full);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_level_scopes_stash_targets() {
        let filter = LogConfig::new("debug")
            .build_filter()
            .unwrap()
            .to_string()
            .to_ascii_lowercase();
        assert!(filter.contains("stash_core=debug"), "{filter}");
        assert!(filter.contains("stash_store=debug"), "{filter}");
        assert!(filter.contains("warn"), "{filter}");
    }

    #[test]
    fn test_quiet_level_quiets_everything() {
        let filter = LogConfig::new("error")
            .build_filter()
            .unwrap()
            .to_string()
            .to_ascii_lowercase();
        assert!(filter.contains("stash_core=error"), "{filter}");
        assert!(!filter.contains("warn"), "{filter}");
    }

    #[test]
    fn test_invalid_level_and_directive() {
        assert!(matches!(
            LogConfig::new("loud").build_filter(),
            Err(TelemetryError::InvalidLevel(_))
        ));
        let config = LogConfig::new("info").with_directive("[invalid=syntax");
        assert!(matches!(
            config.build_filter(),
            Err(TelemetryError::InvalidDirective { .. })
        ));
    }
}
