//! Price aggregator - turns venue tickers into stored price points

use futures::FutureExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use oracle_core::{
    Asset, Clock, FetchResult, NodeConfig, PricePoint, SystemClock, Ticker, Venue, VenuePrice,
};
use oracle_store::TimeSeriesStore;

use crate::scheduler::{CycleTask, ScheduleHandle, Scheduler};
use crate::source::MarketDataSource;

/// Aggregator configuration
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub interval: Duration,
    pub top_assets: usize,
    pub venue_count: usize,
    pub settlement_currency: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            top_assets: 5,
            venue_count: 3,
            settlement_currency: "USDT".to_string(),
        }
    }
}

impl AggregatorConfig {
    pub fn from_node_config(config: &NodeConfig) -> Self {
        Self {
            interval: config.aggregation.interval(),
            top_assets: config.market_data.top_assets,
            venue_count: config.market_data.venue_count,
            settlement_currency: config.market_data.settlement_currency.clone(),
        }
    }
}

/// Outcome of one aggregation cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Points appended to the store
    pub written: usize,
    /// Assets with no usable quote
    pub skipped: usize,
    /// Points the store rejected
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    failed_cycles: AtomicU64,
    points_written: AtomicU64,
}

/// Aggregator statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub points_written: u64,
}

/// Periodic price aggregator.
///
/// Each cycle reads the top assets and the most trusted venues from the
/// market-data source, averages every asset's settlement-currency quotes
/// across those venues and appends one [`PricePoint`] per asset.
#[derive(Clone)]
pub struct PriceAggregator {
    config: Arc<AggregatorConfig>,
    source: Arc<dyn MarketDataSource>,
    store: TimeSeriesStore,
    clock: Arc<dyn Clock>,
    counters: Arc<Counters>,
}

impl PriceAggregator {
    pub fn new(
        config: AggregatorConfig,
        source: Arc<dyn MarketDataSource>,
        store: TimeSeriesStore,
    ) -> Self {
        Self {
            config: Arc::new(config),
            source,
            store,
            clock: Arc::new(SystemClock),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Replace the wall clock used to stamp points
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Run one cycle.
    ///
    /// Every fetch happens before the first write, so a fetch failure leaves
    /// the store untouched. Append failures are counted per asset and do not
    /// stop the remaining assets.
    pub async fn run_cycle(&self) -> FetchResult<CycleReport> {
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);

        let quotes = match self.collect_quotes().await {
            Ok(q) => q,
            Err(e) => {
                self.counters.failed_cycles.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let timestamp = self.clock.now_ms();
        let mut report = CycleReport::default();

        for (asset, venues) in quotes {
            let symbol = asset.symbol.clone();
            let Some(point) = PricePoint::from_quotes(symbol, venues, timestamp) else {
                warn!("No {} quotes for {}", self.config.settlement_currency, asset.id);
                report.skipped += 1;
                continue;
            };

            match self.store.append(&point).await {
                Ok(key) => {
                    info!(
                        symbol = %point.symbol,
                        price = point.price,
                        venues = point.venues.len(),
                        "Stored {}",
                        key
                    );
                    report.written += 1;
                }
                Err(e) => {
                    error!("Failed to store {}: {}", point.symbol, e);
                    report.failed += 1;
                }
            }
        }

        self.counters
            .points_written
            .fetch_add(report.written as u64, Ordering::Relaxed);
        Ok(report)
    }

    /// Fetch everything a cycle needs, grouping valid quotes per asset in
    /// asset order; each asset's quotes follow venue order.
    async fn collect_quotes(&self) -> FetchResult<Vec<(Asset, Vec<VenuePrice>)>> {
        let assets = self.source.list_top_assets(self.config.top_assets).await?;
        let venues: Vec<Venue> = self
            .source
            .list_venues_by_trust()
            .await?
            .into_iter()
            .take(self.config.venue_count)
            .collect();

        let asset_ids: Vec<String> = assets.iter().map(|a| a.id.clone()).collect();
        let mut per_venue = Vec::with_capacity(venues.len());
        for venue in &venues {
            let tickers = self.source.list_tickers(venue, &asset_ids).await?;
            per_venue.push(tickers);
        }

        let settlement = self.config.settlement_currency.to_uppercase();
        let bases: HashSet<String> = assets.iter().map(Asset::base_symbol).collect();
        let usable: Vec<Vec<&Ticker>> = per_venue
            .iter()
            .map(|tickers| {
                tickers
                    .iter()
                    .filter(|t| t.target.to_uppercase() == settlement)
                    .filter(|t| bases.contains(&t.base.to_uppercase()))
                    .filter(|t| t.has_valid_price())
                    .collect()
            })
            .collect();

        Ok(assets
            .into_iter()
            .map(|asset| {
                let base = asset.base_symbol();
                let quotes = usable
                    .iter()
                    .flatten()
                    .filter(|t| t.base.to_uppercase() == base)
                    .map(|t| VenuePrice::new(t.market.clone(), t.last))
                    .collect();
                (asset, quotes)
            })
            .collect())
    }

    /// Run cycles on `scheduler` every configured interval.
    ///
    /// A failed cycle is logged and the schedule carries on.
    pub fn start(&self, scheduler: &dyn Scheduler) -> ScheduleHandle {
        info!(
            "Starting price aggregator on {} every {:?}",
            self.source.name(),
            self.config.interval
        );

        let aggregator = self.clone();
        let task: CycleTask = Arc::new(move || {
            let aggregator = aggregator.clone();
            async move {
                match aggregator.run_cycle().await {
                    Ok(report) => info!(
                        written = report.written,
                        skipped = report.skipped,
                        failed = report.failed,
                        "Aggregation cycle complete"
                    ),
                    Err(e) => error!("Aggregation cycle aborted: {}", e),
                }
            }
            .boxed()
        });

        scheduler.schedule(self.config.interval, task)
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            failed_cycles: self.counters.failed_cycles.load(Ordering::Relaxed),
            points_written: self.counters.points_written.load(Ordering::Relaxed),
        }
    }
}
