//! Market data collaborators.
//!
//! The scheduler never talks to an exchange directly; it consumes two
//! narrow interfaces. Failures from either are transient by contract: the
//! evaluator treats them as "condition not met" and reschedules.

pub mod http;

pub use http::HttpPriceOracle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A point-in-time market quote for one token.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenQuote {
    /// Spot price in USD.
    pub price_usd: f64,
    /// Market capitalization in USD, when the venue reports one.
    pub market_cap_usd: Option<f64>,
}

/// Price/market-cap lookup for a canonical token identifier.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Fetch the current quote for `token`.
    async fn quote(&self, token: &str) -> anyhow::Result<TokenQuote>;
}

/// Maps a user-facing token symbol to the canonical on-chain identifier
/// within that user's known holdings.
///
/// A reference that already is a canonical identifier passes through
/// unchanged.
#[async_trait]
pub trait TokenResolver: Send + Sync {
    /// Resolve `token` for `user_id` into a canonical identifier.
    async fn resolve(&self, user_id: &str, token: &str) -> anyhow::Result<String>;
}
