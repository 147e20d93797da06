//! JSON payloads of the RPC methods

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use oracle_core::{MalformedRequestError, PricePoint};

pub const PING: &str = "ping";
pub const GET_LATEST_PRICES: &str = "getLatestPrices";
pub const GET_HISTORICAL_PRICES: &str = "getHistoricalPrices";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {
    pub nonce: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub nonce: i64,
}

impl PingResponse {
    pub fn answer(request: PingRequest) -> Self {
        Self {
            nonce: request.nonce.wrapping_add(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestPricesRequest {
    pub pairs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalPricesRequest {
    pub pairs: Vec<String>,
    pub from: i64,
    pub to: i64,
}

impl HistoricalPricesRequest {
    pub fn new(pairs: Vec<String>, from: u64, to: u64) -> Self {
        Self {
            pairs,
            from: i64::try_from(from).unwrap_or(i64::MAX),
            to: i64::try_from(to).unwrap_or(i64::MAX),
        }
    }

    /// Inclusive `(from, to)` in epoch ms; negative bounds clamp to 0
    pub fn window(&self) -> (u64, u64) {
        (clamp_ms(self.from), clamp_ms(self.to))
    }
}

fn clamp_ms(ms: i64) -> u64 {
    u64::try_from(ms).unwrap_or(0)
}

/// Symbol to latest point; symbols without data are absent
pub type LatestPricesResponse = BTreeMap<String, PricePoint>;

/// Symbol to points in range; every requested symbol is present
pub type HistoricalPricesResponse = BTreeMap<String, Vec<PricePoint>>;

/// Decode a UTF-8 JSON payload
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, MalformedRequestError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| MalformedRequestError::InvalidUtf8(e.to_string()))?;
    serde_json::from_str(text).map_err(|e| MalformedRequestError::InvalidJson(e.to_string()))
}

/// Encode a payload as UTF-8 JSON
pub fn encode<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}
