//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::{CoreError, CoreResult};

/// Durable storage location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./db/oracle-node"),
        }
    }
}

/// RPC listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 40001,
            request_timeout_secs: 30,
        }
    }
}

impl RpcConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Peer discovery registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub registry_dir: PathBuf,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            registry_dir: PathBuf::from("./db/registry"),
        }
    }
}

/// Market data provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketDataConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Assets taken from the top of the market-cap ranking
    pub top_assets: usize,
    /// Venues taken from the top of the trust ranking
    pub venue_count: usize,
    /// Quote currency a ticker must be priced in to count
    pub settlement_currency: String,
    pub vs_currency: String,
    pub request_timeout_secs: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            api_key: None,
            top_assets: 5,
            venue_count: 3,
            settlement_currency: "USDT".to_string(),
            vs_currency: "usd".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl MarketDataConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Aggregation schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub interval_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300, // 5 minutes
        }
    }
}

impl AggregationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Complete node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub storage: StorageConfig,
    pub rpc: RpcConfig,
    pub discovery: DiscoveryConfig,
    pub market_data: MarketDataConfig,
    pub aggregation: AggregationConfig,
}

impl NodeConfig {
    /// Reject values the node cannot run with
    pub fn validate(&self) -> CoreResult<()> {
        if self.aggregation.interval_secs == 0 {
            return Err(CoreError::InvalidConfig(
                "aggregation.interval_secs must be positive".to_string(),
            ));
        }
        if self.market_data.top_assets == 0 {
            return Err(CoreError::InvalidConfig(
                "market_data.top_assets must be positive".to_string(),
            ));
        }
        if self.market_data.venue_count == 0 {
            return Err(CoreError::InvalidConfig(
                "market_data.venue_count must be positive".to_string(),
            ));
        }
        if self.market_data.settlement_currency.is_empty() {
            return Err(CoreError::InvalidConfig(
                "market_data.settlement_currency must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
