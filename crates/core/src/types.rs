//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Digits in the zero-padded timestamp of a storage key (the width of `u64::MAX`)
pub const TIMESTAMP_KEY_WIDTH: usize = 20;

/// One venue's last-trade price inside an aggregated reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePrice {
    #[serde(rename = "exchange")]
    pub venue: String,
    pub price: f64,
}

impl VenuePrice {
    pub fn new(venue: impl Into<String>, price: f64) -> Self {
        Self {
            venue: venue.into(),
            price,
        }
    }
}

/// Aggregated, timestamped price observation for a symbol.
///
/// Immutable once written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub price: f64,
    #[serde(rename = "exchanges")]
    pub venues: Vec<VenuePrice>,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl PricePoint {
    /// Build a point whose price is the arithmetic mean of the venue quotes.
    ///
    /// Returns `None` when there are no quotes to average.
    pub fn from_quotes(
        symbol: impl Into<String>,
        venues: Vec<VenuePrice>,
        timestamp: u64,
    ) -> Option<Self> {
        if venues.is_empty() {
            return None;
        }

        let total: f64 = venues.iter().map(|v| v.price).sum();
        let price = total / venues.len() as f64;

        Some(Self {
            symbol: symbol.into(),
            price,
            venues,
            timestamp,
        })
    }

    pub fn storage_key(&self) -> StorageKey {
        StorageKey::new(&self.symbol, self.timestamp)
    }
}

/// Key of a price point in the ordered log: `symbol-<zero padded timestamp>`.
///
/// The fixed-width timestamp makes lexicographic key order equal to
/// chronological order within one symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(symbol: &str, timestamp_ms: u64) -> Self {
        Self(format!(
            "{}{:0width$}",
            Self::prefix(symbol),
            timestamp_ms,
            width = TIMESTAMP_KEY_WIDTH
        ))
    }

    /// Prefix shared by every key of `symbol`
    pub fn prefix(symbol: &str) -> String {
        format!("{symbol}-")
    }

    /// Extract the timestamp if `key` belongs to `symbol`.
    ///
    /// Keys whose remainder after `symbol-` is not exactly a padded timestamp
    /// belong to some other symbol (or are not price keys at all).
    pub fn timestamp_of(key: &str, symbol: &str) -> Option<u64> {
        let rest = key.strip_prefix(symbol)?.strip_prefix('-')?;
        if rest.len() != TIMESTAMP_KEY_WIDTH || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        rest.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_of_quotes() {
        let point = PricePoint::from_quotes(
            "btc",
            vec![
                VenuePrice::new("Binance", 100.0),
                VenuePrice::new("Kraken", 110.0),
                VenuePrice::new("Coinbase", 120.0),
            ],
            1_700_000_000_000,
        )
        .unwrap();

        assert!((point.price - 110.0).abs() < 1e-9);
        assert_eq!(point.venues.len(), 3);
    }

    #[test]
    fn test_no_quotes_no_point() {
        assert!(PricePoint::from_quotes("btc", vec![], 1).is_none());
    }

    #[test]
    fn test_keys_sort_chronologically_across_digit_widths() {
        let short = StorageKey::new("btc", 999);
        let long = StorageKey::new("btc", 1_000);
        assert!(short < long);
        assert_eq!(short.as_str(), "btc-00000000000000000999");
    }

    #[test]
    fn test_timestamp_of_rejects_other_symbols() {
        let key = StorageKey::new("btc-x", 5);
        assert_eq!(StorageKey::timestamp_of(key.as_str(), "btc-x"), Some(5));
        assert_eq!(StorageKey::timestamp_of(key.as_str(), "btc"), None);
        assert_eq!(StorageKey::timestamp_of("dht-seed", "dht"), None);
    }

    #[test]
    fn test_wire_field_names() {
        let point = PricePoint::from_quotes("eth", vec![VenuePrice::new("Kraken", 2.0)], 7).unwrap();
        let json = serde_json::to_value(&point).unwrap();

        assert_eq!(json["symbol"], "eth");
        assert_eq!(json["timestamp"], 7);
        assert_eq!(json["exchanges"][0]["exchange"], "Kraken");
        assert_eq!(json["exchanges"][0]["price"], 2.0);
    }

    #[test]
    fn test_wire_round_trip() {
        let point = PricePoint::from_quotes(
            "sol",
            vec![VenuePrice::new("Binance", 141.25), VenuePrice::new("OKX", 141.5)],
            1_716_000_000_123,
        )
        .unwrap();

        let bytes = serde_json::to_vec(&point).unwrap();
        let decoded: PricePoint = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, point);
    }
}
