//! Price oracle node
//!
//! Main entry point: aggregates prices on a schedule and serves them over RPC

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use oracle_node::{logging, settings, FileDiscovery, RpcGateway};
use oracle_price_feed::{AggregatorConfig, CoinGeckoSource, IntervalScheduler, PriceAggregator};
use oracle_store::{IdentityStore, LogStore, TimeSeriesStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    logging::init("info");

    info!("Starting price oracle node v{}", env!("CARGO_PKG_VERSION"));

    let config = settings::load()?;

    let log = Arc::new(
        LogStore::open(&config.storage.data_dir)
            .with_context(|| format!("cannot open {}", config.storage.data_dir.display()))?,
    );
    let identities = IdentityStore::new(Arc::clone(&log));
    let store = TimeSeriesStore::new(log);

    let discovery = Arc::new(FileDiscovery::new(&config.discovery.registry_dir));
    let mut gateway = RpcGateway::new(config.rpc.clone(), identities, store.clone(), discovery);

    gateway.prepare().await.context("identity initialization failed")?;
    let address = gateway.serve().await?;
    if let Some(public_key) = gateway.public_key() {
        info!("RPC server listening on {} with public key {}", address, public_key);
    }

    let source = CoinGeckoSource::new(&config.market_data)?;
    let aggregator = PriceAggregator::new(
        AggregatorConfig::from_node_config(&config),
        Arc::new(source),
        store,
    );
    let mut schedule = aggregator.start(&IntervalScheduler);

    info!("Press Ctrl+C to shutdown");
    shutdown_signal().await;

    schedule.cancel();
    if let Err(e) = gateway.close().await {
        error!("Gateway shutdown error: {}", e);
        return Err(e.into());
    }

    let stats = aggregator.stats();
    info!(
        cycles = stats.cycles,
        failed_cycles = stats.failed_cycles,
        points_written = stats.points_written,
        "Node shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received termination signal");
        }
    }
}
