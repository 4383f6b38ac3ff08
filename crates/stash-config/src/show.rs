//! Source-annotated display for `config show`.

use std::fmt::{self, Write as _};

use crate::merge::FieldSources;
use crate::types::Config;

/// A resolved configuration together with source annotations.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The final merged configuration.
    pub config: Config,
    /// Dotted field path → which layer set the value.
    pub field_sources: FieldSources,
    /// Config file paths that were loaded (in precedence order).
    pub loaded_files: Vec<String>,
}

/// Output format for `config show`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowFormat {
    /// TOML with inline comments showing source.
    Toml,
    /// JSON (for programmatic consumption).
    Json,
}

impl ResolvedConfig {
    /// Render the resolved config, optionally a single section.
    ///
    /// Credentials never appear in the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or `section` does not exist.
    pub fn show(&self, format: ShowFormat, section: Option<&str>) -> Result<String, fmt::Error> {
        let value = self.rendered_value(section)?;
        match format {
            ShowFormat::Json => serde_json::to_string_pretty(&value).map_err(|_| fmt::Error),
            ShowFormat::Toml => {
                let body = toml::to_string_pretty(&value).map_err(|_| fmt::Error)?;
                let mut out = self.toml_preamble()?;
                self.annotate(&body, section.unwrap_or(""), &mut out)?;
                Ok(out)
            },
        }
    }

    fn rendered_value(&self, section: Option<&str>) -> Result<toml::Value, fmt::Error> {
        let whole = toml::Value::try_from(&self.config).map_err(|_| fmt::Error)?;
        match section {
            None => Ok(whole),
            Some(name) => whole.get(name).cloned().ok_or(fmt::Error),
        }
    }

    fn toml_preamble(&self) -> Result<String, fmt::Error> {
        let mut out = String::from("# Resolved Stash Configuration\n");
        if !self.loaded_files.is_empty() {
            out.push_str("# Files, lowest precedence first:\n");
            for (n, path) in (1_usize..).zip(&self.loaded_files) {
                writeln!(out, "#   {n}. {path}")?;
            }
        }
        out.push('\n');
        Ok(out)
    }

    /// Copy `body` into `out`, tagging each `key = value` line with the layer
    /// that set it. `base` is the dotted path of the rendered section.
    fn annotate(&self, body: &str, base: &str, out: &mut String) -> fmt::Result {
        let mut table = base.to_owned();
        for line in body.lines() {
            let trimmed = line.trim();
            if let Some(header) = table_header(trimmed) {
                table = join_path(base, header);
                writeln!(out, "{line}")?;
                continue;
            }
            if trimmed.starts_with("[[") {
                // Array entries are sourced as a whole, not per key.
                table = join_path(base, "[]");
                writeln!(out, "{line}")?;
                continue;
            }
            let layer = trimmed
                .split_once('=')
                .map(|(key, _)| join_path(&table, key.trim()))
                .and_then(|path| self.field_sources.get(&path));
            match layer {
                Some(layer) => writeln!(out, "{line}  # [{layer}]")?,
                None => writeln!(out, "{line}")?,
            }
        }
        Ok(())
    }
}

/// `[name]` yields `name`; `[[name]]` and anything else yield `None`.
fn table_header(line: &str) -> Option<&str> {
    line.strip_prefix('[')?
        .strip_suffix(']')
        .filter(|inner| !inner.starts_with('['))
}

fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_owned()
    } else {
        format!("{base}.{key}")
    }
}
