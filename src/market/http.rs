//! HTTP client for the price oracle service.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{PriceOracle, TokenQuote, TokenResolver};

/// Request timeout for oracle lookups.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Price oracle backed by an HTTP market-data service.
///
/// Expects `GET {base_url}/tokens/{token}` to return
/// `{"priceUsd": <f64>, "marketCapUsd": <f64|null>}` and
/// `GET {base_url}/holdings/{user_id}/{symbol}` to return
/// `{"address": "<canonical id>"}`.
#[derive(Debug, Clone)]
pub struct HttpPriceOracle {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    price_usd: f64,
    market_cap_usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HoldingResponse {
    address: String,
}

impl HttpPriceOracle {
    /// Create a client against `base_url`.
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn quote(&self, token: &str) -> anyhow::Result<TokenQuote> {
        let url = format!("{}/tokens/{token}", self.base_url);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let quote: QuoteResponse = response.json().await?;

        if !quote.price_usd.is_finite() {
            anyhow::bail!("Oracle returned non-finite price for {token}");
        }
        Ok(TokenQuote {
            price_usd: quote.price_usd,
            market_cap_usd: quote.market_cap_usd.filter(|cap| cap.is_finite()),
        })
    }
}

#[async_trait]
impl TokenResolver for HttpPriceOracle {
    async fn resolve(&self, user_id: &str, token: &str) -> anyhow::Result<String> {
        let url = format!("{}/holdings/{user_id}/{token}", self.base_url);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let holding: HoldingResponse = response.json().await?;
        Ok(holding.address)
    }
}
