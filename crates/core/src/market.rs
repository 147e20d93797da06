//! Market data shapes consumed by the aggregator

use serde::{Deserialize, Serialize};

/// An asset ranked by market capitalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Provider-specific identifier (e.g. "bitcoin")
    pub id: String,
    /// Ticker symbol as reported by the provider (e.g. "btc")
    pub symbol: String,
}

impl Asset {
    pub fn new(id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
        }
    }

    /// Symbol in the form venues quote it as a ticker base
    pub fn base_symbol(&self) -> String {
        self.symbol.to_uppercase()
    }
}

/// A market venue with its trust ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: String,
    pub name: String,
    pub trust_score: Option<f64>,
    pub trust_score_rank: Option<u32>,
}

impl Venue {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            trust_score: None,
            trust_score_rank: None,
        }
    }
}

/// A recent trade ticker from a venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub base: String,
    pub target: String,
    pub last: f64,
    /// Display name of the venue that quoted it
    pub market: String,
}

impl Ticker {
    pub fn new(
        base: impl Into<String>,
        target: impl Into<String>,
        last: f64,
        market: impl Into<String>,
    ) -> Self {
        Self {
            base: base.into(),
            target: target.into(),
            last,
            market: market.into(),
        }
    }

    /// A usable last-trade price
    pub fn has_valid_price(&self) -> bool {
        self.last.is_finite() && self.last > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_symbol_uppercase() {
        assert_eq!(Asset::new("bitcoin", "btc").base_symbol(), "BTC");
    }

    #[test]
    fn test_invalid_ticker_prices() {
        assert!(Ticker::new("BTC", "USDT", 1.0, "Binance").has_valid_price());
        assert!(!Ticker::new("BTC", "USDT", 0.0, "Binance").has_valid_price());
        assert!(!Ticker::new("BTC", "USDT", f64::NAN, "Binance").has_valid_price());
        assert!(!Ticker::new("BTC", "USDT", f64::INFINITY, "Binance").has_valid_price());
    }
}
