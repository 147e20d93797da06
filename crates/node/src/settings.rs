//! Configuration loading
//!
//! Sources, lowest priority first:
//! 1. built-in defaults
//! 2. `oracle.toml` in the working directory, or the file named by `ORACLE_CONFIG`
//! 3. environment variables such as `ORACLE__RPC__PORT=40001`
//!
//! `COINGECKO_API_KEY` fills in the market data API key when no other source
//! set one.

use anyhow::Context;
use config::{Config, Environment, File};
use std::env;
use std::path::PathBuf;
use tracing::debug;

use oracle_core::NodeConfig;

pub const CONFIG_PATH_VAR: &str = "ORACLE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "oracle.toml";
pub const API_KEY_VAR: &str = "COINGECKO_API_KEY";

/// Load and validate the node configuration
pub fn load() -> anyhow::Result<NodeConfig> {
    let path = env::var(CONFIG_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    load_from(path, Environment::with_prefix("ORACLE"))
}

fn load_from(path: PathBuf, environment: Environment) -> anyhow::Result<NodeConfig> {
    debug!("Loading configuration from {}", path.display());

    let mut config: NodeConfig = Config::builder()
        .add_source(File::from(path.clone()).required(false))
        .add_source(
            environment
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .and_then(Config::try_deserialize)
        .with_context(|| format!("invalid configuration ({})", path.display()))?;

    if config.market_data.api_key.is_none() {
        config.market_data.api_key = env::var(API_KEY_VAR).ok().filter(|k| !k.is_empty());
    }

    config.validate()?;
    Ok(config)
}
