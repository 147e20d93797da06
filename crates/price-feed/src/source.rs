//! Market data sources

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use oracle_core::{Asset, DataSourceFetchError, FetchResult, MarketDataConfig, Ticker, Venue};

/// Header CoinGecko reads the demo API key from
const API_KEY_HEADER: &str = "x_cg_demo_api_key";

/// External provider of assets, venues and trade tickers
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Top `limit` assets by market capitalization, largest first
    async fn list_top_assets(&self, limit: usize) -> FetchResult<Vec<Asset>>;

    /// Venues ordered from most to least trusted
    async fn list_venues_by_trust(&self) -> FetchResult<Vec<Venue>>;

    /// Recent tickers on `venue` for the given asset ids
    async fn list_tickers(&self, venue: &Venue, asset_ids: &[String]) -> FetchResult<Vec<Ticker>>;
}

#[derive(Debug, Deserialize)]
struct CoinMarket {
    id: String,
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct Exchange {
    id: String,
    name: String,
    trust_score: Option<f64>,
    trust_score_rank: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TickersResponse {
    tickers: Vec<CoinTicker>,
}

#[derive(Debug, Deserialize)]
struct CoinTicker {
    base: String,
    target: String,
    last: Option<f64>,
    market: TickerMarket,
}

#[derive(Debug, Deserialize)]
struct TickerMarket {
    name: String,
}

/// CoinGecko v3 REST client
#[derive(Debug, Clone)]
pub struct CoinGeckoSource {
    client: Client,
    base_url: String,
    vs_currency: String,
}

impl CoinGeckoSource {
    pub fn new(config: &MarketDataConfig) -> FetchResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let mut value = HeaderValue::from_str(key).map_err(|e| DataSourceFetchError::Http {
                url: config.base_url.clone(),
                reason: format!("invalid API key header: {}", e),
            })?;
            value.set_sensitive(true);
            headers.insert(HeaderName::from_static(API_KEY_HEADER), value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| DataSourceFetchError::Http {
                url: config.base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            vs_currency: config.vs_currency.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> FetchResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| DataSourceFetchError::Http {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DataSourceFetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| DataSourceFetchError::Decode {
                url,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl MarketDataSource for CoinGeckoSource {
    fn name(&self) -> &'static str {
        "coingecko"
    }

    async fn list_top_assets(&self, limit: usize) -> FetchResult<Vec<Asset>> {
        let coins: Vec<CoinMarket> = self
            .get_json(
                "/coins/markets",
                &[
                    ("vs_currency", self.vs_currency.clone()),
                    ("order", "market_cap_desc".to_string()),
                    ("per_page", limit.to_string()),
                    ("page", "1".to_string()),
                    ("sparkline", "false".to_string()),
                ],
            )
            .await?;

        Ok(coins
            .into_iter()
            .take(limit)
            .map(|c| Asset::new(c.id, c.symbol))
            .collect())
    }

    async fn list_venues_by_trust(&self) -> FetchResult<Vec<Venue>> {
        let exchanges: Vec<Exchange> = self.get_json("/exchanges", &[]).await?;

        let venues = exchanges
            .into_iter()
            .map(|e| Venue {
                id: e.id,
                name: e.name,
                trust_score: e.trust_score,
                trust_score_rank: e.trust_score_rank,
            })
            .collect();

        Ok(rank_by_trust(venues))
    }

    async fn list_tickers(&self, venue: &Venue, asset_ids: &[String]) -> FetchResult<Vec<Ticker>> {
        let response: TickersResponse = self
            .get_json(
                &format!("/exchanges/{}/tickers", venue.id),
                &[("coin_ids", asset_ids.join(","))],
            )
            .await?;

        Ok(response
            .tickers
            .into_iter()
            .map(|t| Ticker {
                base: t.base,
                target: t.target,
                // Missing prices are rejected downstream as invalid
                last: t.last.unwrap_or(f64::NAN),
                market: t.market.name,
            })
            .collect())
    }
}

/// Highest trust score first; ties broken by the provider's trust rank.
///
/// Venues without a score sort last. The sort is stable, so remaining ties
/// keep the provider's order.
pub fn rank_by_trust(mut venues: Vec<Venue>) -> Vec<Venue> {
    venues.sort_by(|a, b| {
        let score_a = a.trust_score.unwrap_or(f64::NEG_INFINITY);
        let score_b = b.trust_score.unwrap_or(f64::NEG_INFINITY);
        score_b.total_cmp(&score_a).then_with(|| {
            a.trust_score_rank
                .unwrap_or(u32::MAX)
                .cmp(&b.trust_score_rank.unwrap_or(u32::MAX))
        })
    });
    venues
}
