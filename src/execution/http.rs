//! HTTP clients for the execution and activity services.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{
    ActivityEntry, ActivityRecorder, Credentials, ExecutionClient, ExecutionReceipt,
    IdentityResolver, SwapOrder,
};

/// Swaps can take a while to confirm on-chain.
const EXECUTE_TIMEOUT: Duration = Duration::from_secs(90);
const RECORD_TIMEOUT: Duration = Duration::from_secs(10);

/// Execution service client.
///
/// Expects `POST {base_url}/swap` with the order and credentials, returning
/// `{"transactionId": ..., "amountFrom": ..., "usdAmount": ...}` on success
/// and a non-2xx status on failure. Also serves identity resolution at
/// `GET {base_url}/identity/{user_id}`.
#[derive(Debug, Clone)]
pub struct HttpExecutionClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    transaction_id: String,
    amount_from: Option<f64>,
    usd_amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    credentials: String,
}

impl HttpExecutionClient {
    /// Create a client against `base_url`.
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(EXECUTE_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ExecutionClient for HttpExecutionClient {
    async fn execute_swap(
        &self,
        order: &SwapOrder,
        credentials: &Credentials,
    ) -> anyhow::Result<ExecutionReceipt> {
        let url = format!("{}/swap", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "from": order.from,
                "to": order.to,
                "amount": order.amount,
                "credentials": credentials.0,
            }))
            .send()
            .await?
            .error_for_status()?;
        let swap: SwapResponse = response.json().await?;
        Ok(ExecutionReceipt {
            transaction_id: swap.transaction_id,
            amount_from: swap.amount_from,
            usd_amount: swap.usd_amount,
        })
    }
}

#[async_trait]
impl IdentityResolver for HttpExecutionClient {
    async fn credentials_for(&self, user_id: &str) -> anyhow::Result<Credentials> {
        let url = format!("{}/identity/{user_id}", self.base_url);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let identity: IdentityResponse = response.json().await?;
        Ok(Credentials(identity.credentials))
    }
}

/// Activity sink client.
///
/// Posts entries to `POST {base_url}/activity/{user_id}`.
#[derive(Debug, Clone)]
pub struct HttpActivityRecorder {
    client: reqwest::Client,
    base_url: String,
}

impl HttpActivityRecorder {
    /// Create a client against `base_url`.
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(RECORD_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ActivityRecorder for HttpActivityRecorder {
    async fn record(&self, user_id: &str, entry: &ActivityEntry) -> anyhow::Result<()> {
        let url = format!("{}/activity/{user_id}", self.base_url);
        self.client
            .post(&url)
            .json(entry)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
