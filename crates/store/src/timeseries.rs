//! Time-ordered price log keyed by `symbol-timestamp`

use std::sync::Arc;
use tracing::debug;

use oracle_core::{
    PricePoint, ReadResult, StorageKey, StorageReadError, StorageWriteError, WriteResult,
};

use crate::log::LogStore;

/// Append-only store of [`PricePoint`]s.
///
/// Owned by a single process (see [`LogStore`]); clones share the same log.
#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    log: Arc<LogStore>,
}

impl TimeSeriesStore {
    pub fn new(log: Arc<LogStore>) -> Self {
        Self { log }
    }

    /// Persist one reading under its storage key.
    ///
    /// A key that was already written is rejected; points are never replaced.
    pub async fn append(&self, point: &PricePoint) -> WriteResult<StorageKey> {
        let key = point.storage_key();
        let value =
            serde_json::to_vec(point).map_err(|e| StorageWriteError::Encode(e.to_string()))?;

        let log = Arc::clone(&self.log);
        let write_key = key.clone();
        tokio::task::spawn_blocking(move || log.insert(write_key.as_str(), &value))
            .await
            .map_err(|e| StorageWriteError::Task(e.to_string()))??;

        debug!("Stored {} at {}", point.symbol, point.timestamp);
        Ok(key)
    }

    /// Most recent reading for `symbol`, if any was ever written
    pub fn get_latest(&self, symbol: &str) -> ReadResult<Option<PricePoint>> {
        for (key, value) in self.log.scan_prefix_rev(&StorageKey::prefix(symbol)) {
            if StorageKey::timestamp_of(&key, symbol).is_none() {
                continue;
            }
            return decode(&key, &value).map(Some);
        }
        Ok(None)
    }

    /// Readings for `symbol` with `from <= timestamp <= to`, oldest first.
    ///
    /// An inverted range yields nothing.
    pub fn get_range(&self, symbol: &str, from: u64, to: u64) -> ReadResult<Vec<PricePoint>> {
        if from > to {
            return Ok(Vec::new());
        }

        let start = StorageKey::new(symbol, from);
        let end = StorageKey::new(symbol, to);

        self.log
            .range(start.as_str(), end.as_str())
            .into_iter()
            .filter(|(key, _)| StorageKey::timestamp_of(key, symbol).is_some())
            .map(|(key, value)| decode(&key, &value))
            .collect()
    }
}

fn decode(key: &str, value: &[u8]) -> ReadResult<PricePoint> {
    serde_json::from_slice(value).map_err(|e| StorageReadError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
