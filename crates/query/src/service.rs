//! Batch lookups over the time-series store

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use oracle_core::{PricePoint, QueryResult};
use oracle_store::TimeSeriesStore;

/// Resolves price queries for many symbols at once.
///
/// Duplicate symbols in a request are looked up once. The first storage
/// failure ends the request.
#[derive(Debug, Clone)]
pub struct QueryService {
    store: TimeSeriesStore,
}

impl QueryService {
    pub fn new(store: TimeSeriesStore) -> Self {
        Self { store }
    }

    /// Latest point per symbol. Symbols without data are left out.
    pub fn resolve_latest(&self, symbols: &[String]) -> QueryResult<BTreeMap<String, PricePoint>> {
        let mut found = BTreeMap::new();

        for symbol in distinct(symbols) {
            if let Some(point) = self.store.get_latest(symbol)? {
                found.insert(symbol.clone(), point);
            }
        }

        debug!("Resolved latest for {}/{} symbols", found.len(), symbols.len());
        Ok(found)
    }

    /// Points per symbol with `from <= timestamp <= to`, oldest first.
    ///
    /// Every requested symbol gets an entry, empty when nothing matched.
    pub fn resolve_historical(
        &self,
        symbols: &[String],
        from: u64,
        to: u64,
    ) -> QueryResult<BTreeMap<String, Vec<PricePoint>>> {
        let mut found = BTreeMap::new();

        for symbol in distinct(symbols) {
            let points = self.store.get_range(symbol, from, to)?;
            found.insert(symbol.clone(), points);
        }

        Ok(found)
    }
}

/// `symbols` in request order, each at most once
fn distinct(symbols: &[String]) -> impl Iterator<Item = &String> {
    let mut seen = BTreeSet::new();
    symbols.iter().filter(move |&s| seen.insert(s.as_str()))
}
