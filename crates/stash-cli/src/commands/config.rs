//! Config command - show the resolved configuration.

use anyhow::{Result, anyhow};
use stash_config::{ResolvedConfig, ShowFormat};

/// Print the resolved configuration with source annotations.
pub(crate) fn show_config(
    resolved: &ResolvedConfig,
    format: &str,
    section: Option<&str>,
) -> Result<()> {
    let format = match format {
        "json" => ShowFormat::Json,
        "toml" => ShowFormat::Toml,
        other => return Err(anyhow!("unknown format '{other}'; expected toml or json")),
    };
    let output = resolved.show(format, section).map_err(|_| match section {
        Some(name) => anyhow!("no configuration section named '{name}'"),
        None => anyhow!("failed to render configuration"),
    })?;
    println!("{output}");
    Ok(())
}
