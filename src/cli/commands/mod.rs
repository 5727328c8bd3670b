//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod cache;
mod ingest;
mod probe;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::helpers::load_settings;

#[derive(Parser)]
#[command(name = "rafflescope")]
#[command(about = "Raffle ticket-count and deadline extraction engine")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Render cache directory, overriding the settings file
    #[arg(long, global = true, env = "RAFFLESCOPE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Check each site's availability endpoint and classify the response
    Probe {
        /// Settings file (.json, .toml, .yaml); discovered when omitted
        #[arg(env = "RAFFLESCOPE_CONFIG")]
        config: Option<PathBuf>,
        /// Print results as JSON instead of text
        #[arg(long)]
        json: bool,
        /// Also write results as JSON to this path
        #[arg(long)]
        json_output: Option<PathBuf>,
    },

    /// Run one ingestion cycle and print the extracted raffles
    Ingest {
        /// Settings file (.json, .toml, .yaml); discovered when omitted
        #[arg(env = "RAFFLESCOPE_CONFIG")]
        config: Option<PathBuf>,
        /// Print records and the run report as JSON
        #[arg(long)]
        json: bool,
        /// Only ingest these sites (by name)
        #[arg(short, long)]
        site: Vec<String>,
    },

    /// Manage the render cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Remove expired cache entries
    Purge {
        /// Settings file (.json, .toml, .yaml); discovered when omitted
        #[arg(env = "RAFFLESCOPE_CONFIG")]
        config: Option<PathBuf>,
    },
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cache_dir = cli.cache_dir.as_deref();

    match cli.command {
        Commands::Probe {
            config,
            json,
            json_output,
        } => {
            let settings = load_settings(config.as_deref(), cache_dir).await?;
            probe::cmd_probe(settings, json, json_output.as_deref()).await
        }
        Commands::Ingest { config, json, site } => {
            let settings = load_settings(config.as_deref(), cache_dir).await?;
            ingest::cmd_ingest(settings, json, &site).await
        }
        Commands::Cache { command } => match command {
            CacheCommands::Purge { config } => {
                let settings = load_settings(config.as_deref(), cache_dir).await?;
                cache::cmd_cache_purge(settings).await
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cache_dir_flag_after_subcommand() {
        let cli = Cli::try_parse_from([
            "rafflescope",
            "cache",
            "purge",
            "settings.toml",
            "--cache-dir",
            "/tmp/renders",
        ])
        .unwrap();
        assert_eq!(cli.cache_dir.as_deref(), Some(std::path::Path::new("/tmp/renders")));
        match cli.command {
            Commands::Cache {
                command: CacheCommands::Purge { config },
            } => assert_eq!(config.as_deref(), Some(std::path::Path::new("settings.toml"))),
            _ => panic!("expected cache purge"),
        }
    }

    #[test]
    fn test_cache_dir_and_config_from_env() {
        std::env::set_var("RAFFLESCOPE_CACHE_DIR", "/var/cache/rafflescope");
        std::env::set_var("RAFFLESCOPE_CONFIG", "/etc/rafflescope.yaml");
        let cli = Cli::try_parse_from(["rafflescope", "ingest", "--json"]).unwrap();
        std::env::remove_var("RAFFLESCOPE_CACHE_DIR");
        std::env::remove_var("RAFFLESCOPE_CONFIG");

        assert_eq!(
            cli.cache_dir.as_deref(),
            Some(std::path::Path::new("/var/cache/rafflescope"))
        );
        match cli.command {
            Commands::Ingest { config, json, .. } => {
                assert!(json);
                assert_eq!(config.as_deref(), Some(std::path::Path::new("/etc/rafflescope.yaml")));
            }
            _ => panic!("expected ingest"),
        }
    }
}
