//! Periodic price aggregation from external market data
//!
//! Features:
//! - Market data source abstraction with a CoinGecko client
//! - Mean price per asset across the most trusted venues
//! - Append-only persistence of every reading
//! - Injectable scheduling, so cycles can be driven without wall-clock delays

pub mod aggregator;
pub mod scheduler;
pub mod source;

pub use aggregator::{AggregatorConfig, AggregatorStats, CycleReport, PriceAggregator};
pub use scheduler::{CycleTask, IntervalScheduler, ManualScheduler, ScheduleHandle, Scheduler};
pub use source::{CoinGeckoSource, MarketDataSource};
