//! Durable storage for the oracle node
//!
//! Features:
//! - Append-only, checksummed key-value log with an ordered in-memory index
//! - Time-series view keyed by `symbol-timestamp`
//! - Persisted identity seeds
//!
//! One process owns a data directory at a time; both stores share its log.

pub mod log;
pub mod timeseries;
pub mod identity;

pub use identity::{IdentityStore, Seed, DISCOVERY_SEED_KEY, RPC_SEED_KEY, SEED_LEN};
pub use log::LogStore;
pub use timeseries::TimeSeriesStore;
