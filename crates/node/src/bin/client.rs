//! Command-line client for a price oracle node

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use oracle_core::now_ms;
use oracle_node::{logging, FileDiscovery, Keypair, PublicKey, RpcClient};
use oracle_store::{IdentityStore, LogStore, DISCOVERY_SEED_KEY};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Parser, Debug)]
#[command(name = "oracle-client", version, about = "Query a price oracle node by public key")]
struct Cli {
    /// Hex-encoded RPC public key printed by the node on startup
    server: PublicKey,

    /// Client's own data directory (holds its discovery seed)
    #[arg(long, default_value = "./db/rpc-client")]
    data_dir: PathBuf,

    /// Registry directory shared with the node
    #[arg(long, default_value = "./db/registry")]
    registry_dir: PathBuf,

    /// Round-trip timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a nonce and expect it back incremented
    Ping {
        #[arg(default_value_t = 126, allow_negative_numbers = true)]
        nonce: i64,
    },
    /// Latest aggregated price per symbol
    Latest {
        #[arg(default_value = "btc,eth", value_delimiter = ',')]
        pairs: Vec<String>,
    },
    /// Prices within a time window, oldest first
    Historical {
        #[arg(default_value = "btc,eth", value_delimiter = ',')]
        pairs: Vec<String>,
        /// Window start in epoch milliseconds (default: two days ago)
        #[arg(long)]
        from: Option<u64>,
        /// Window end in epoch milliseconds (default: now)
        #[arg(long)]
        to: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init("warn");

    let cli = Cli::parse();

    let log = Arc::new(
        LogStore::open(&cli.data_dir)
            .with_context(|| format!("cannot open {}", cli.data_dir.display()))?,
    );
    let seed = IdentityStore::new(log)
        .get_or_create_seed(DISCOVERY_SEED_KEY)
        .await?;
    info!("Client identity {}", Keypair::from_seed(&seed).public_key());

    let discovery = Arc::new(FileDiscovery::new(cli.registry_dir));
    let client = RpcClient::new(discovery, Duration::from_secs(cli.timeout_secs));

    let output = match cli.command {
        Command::Ping { nonce } => {
            let nonce = client.ping(&cli.server, nonce).await?;
            serde_json::json!({ "nonce": nonce })
        }
        Command::Latest { pairs } => {
            let prices = client.get_latest_prices(&cli.server, &pairs).await?;
            serde_json::to_value(prices)?
        }
        Command::Historical { pairs, from, to } => {
            let to = to.unwrap_or_else(now_ms);
            let from = from.unwrap_or_else(|| to.saturating_sub(2 * DAY_MS));
            let prices = client
                .get_historical_prices(&cli.server, &pairs, from, to)
                .await?;
            serde_json::to_value(prices)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
