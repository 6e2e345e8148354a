//! Command-line definitions and dispatch.

mod cache;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use response_cache::{CacheConfig, CacheKey};

#[derive(Parser, Debug)]
#[command(name = "response-cache", version, about = "Inspect and maintain the response cache")]
pub(crate) struct Cli {
    /// JSON config file (defaults to <config dir>/response-cache/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Show entry counts and sizes
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every cached entry
    Clear,
    /// Remove expired entries once
    Sweep,
    /// Look up a cached payload
    Get {
        #[command(flatten)]
        request: RequestArgs,
        /// Write the payload to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the canonical key and its hash
    Key {
        #[command(flatten)]
        request: RequestArgs,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct RequestArgs {
    /// Request URL
    pub url: String,
    /// HTTP method
    #[arg(long, default_value = "GET")]
    pub method: String,
    /// Header included in the key, as NAME:VALUE (repeatable)
    #[arg(long = "header", value_name = "NAME:VALUE")]
    pub headers: Vec<String>,
}

impl RequestArgs {
    pub(crate) fn key(&self) -> Result<CacheKey> {
        let headers = self
            .headers
            .iter()
            .map(|raw| {
                raw.split_once(':')
                    .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                    .with_context(|| format!("Header '{}' is not in NAME:VALUE form", raw))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CacheKey::derive(self.url.clone(), &self.method, headers))
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("response-cache")
        .join("config.json")
}

pub(crate) fn load_config(path: Option<PathBuf>) -> Result<CacheConfig> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = CacheConfig::load_from_path(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.apply_env_overrides();
    Ok(config)
}

pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config)?;
    match cli.command {
        Command::Stats { json } => cache::cmd_stats(config, json).await,
        Command::Clear => cache::cmd_clear(config).await,
        Command::Sweep => cache::cmd_sweep(config).await,
        Command::Get { request, out } => cache::cmd_get(config, request.key()?, out).await,
        Command::Key { request } => {
            cache::cmd_key(&request.key()?);
            Ok(())
        }
    }
}
