//! Stash CLI - records with secondary indexes over an object store.
//!
//! Schemas come from the `[[entities]]` tables of the configuration; the
//! store is whatever `[store]` points at.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
pub mod config_bridge;

use commands::records::FindArgs;
use commands::{config, records};

/// Stash - typed records over an object store
#[derive(Parser)]
#[command(name = "stash")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a configuration file layered over ~/.stash/config.toml
    #[arg(short, long, global = true, env = "STASH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save a record given as a JSON object
    Save {
        /// Entity name
        entity: String,
        /// Record data, e.g. '{"email": "x@x.com", "score": 20}'
        data: String,
    },

    /// Print a record
    Get {
        /// Entity name
        entity: String,
        /// Record id
        id: String,
    },

    /// Delete a record
    Delete {
        /// Entity name
        entity: String,
        /// Record id
        id: String,
    },

    /// Find records matching a filter
    Find {
        /// Entity name
        entity: String,
        /// Filter, e.g. '{"score": {"$gte": 10}, "team": "red"}'
        #[arg(short, long = "where")]
        filter: Option<String>,
        /// Sort key `column[:desc]`, repeatable
        #[arg(short, long)]
        order: Vec<String>,
        /// Maximum number of records
        #[arg(short, long)]
        limit: Option<usize>,
        /// Records to skip after sorting
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Attach matched numeric values
        #[arg(long)]
        scores: bool,
    },

    /// Delete expired records of an entity
    Purge {
        /// Entity name
        entity: String,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the resolved configuration with the source of each value
    Show {
        /// Output format: toml or json
        #[arg(short, long, default_value = "toml")]
        format: String,
        /// Only show one section, e.g. `index`
        #[arg(short, long)]
        section: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = stash_config::Config::load(cli.config.as_deref());

    // Set up logging from config, with --verbose override.
    let log_config = if let Ok(resolved) = &loaded {
        let mut lc = config_bridge::to_log_config(&resolved.config);
        if cli.verbose {
            "debug".clone_into(&mut lc.level);
        }
        lc
    } else {
        let level = if cli.verbose { "debug" } else { "warn" };
        stash_telemetry::LogConfig::new(level)
    };
    if let Err(e) = stash_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let resolved = loaded?;

    match cli.command {
        Commands::Config {
            command: ConfigCommands::Show { format, section },
        } => config::show_config(&resolved, &format, section.as_deref()),
        Commands::Save { entity, data } => {
            let stash = config_bridge::build_stash(&resolved.config)?;
            records::save(&stash, &entity, &data).await
        },
        Commands::Get { entity, id } => {
            let stash = config_bridge::build_stash(&resolved.config)?;
            records::get(&stash, &entity, &id).await
        },
        Commands::Delete { entity, id } => {
            let stash = config_bridge::build_stash(&resolved.config)?;
            records::delete(&stash, &entity, &id).await
        },
        Commands::Find {
            entity,
            filter,
            order,
            limit,
            offset,
            scores,
        } => {
            let stash = config_bridge::build_stash(&resolved.config)?;
            let args = FindArgs {
                filter,
                order,
                limit,
                offset,
                scores,
            };
            records::find(&stash, &entity, &args).await
        },
        Commands::Purge { entity } => {
            let stash = config_bridge::build_stash(&resolved.config)?;
            records::purge(&stash, &entity).await
        },
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_find() {
        let cli = Cli::try_parse_from([
            "stash", "--config", "s.toml", "find", "users", "--where", "{}", "-o", "score:desc",
            "-o", "nick", "--limit", "3", "--scores",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("s.toml")));
        match cli.command {
            Commands::Find {
                entity,
                order,
                limit,
                offset,
                scores,
                ..
            } => {
                assert_eq!(entity, "users");
                assert_eq!(order, vec!["score:desc", "nick"]);
                assert_eq!(limit, Some(3));
                assert_eq!(offset, 0);
                assert!(scores);
            },
            _ => panic!("expected find"),
        }
    }
}
