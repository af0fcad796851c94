//! Condition evaluation against live market data.

use std::sync::Arc;

use crate::domain::Mission;
use crate::market::{PriceOracle, TokenResolver};

/// Outcome of one condition check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// The trigger fired; the mission should execute.
    Met,
    /// The trigger has not fired (or could not be checked).
    NotMet,
}

/// Evaluates a mission's trigger condition.
///
/// Evaluation is fail-open: any failure along the way (symbol resolution,
/// quote lookup, a venue that reports no market cap) counts as "not met"
/// and the mission is rescheduled rather than failed.
pub struct ConditionEvaluator {
    oracle: Arc<dyn PriceOracle>,
    resolver: Arc<dyn TokenResolver>,
}

impl std::fmt::Debug for ConditionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionEvaluator").finish_non_exhaustive()
    }
}

impl ConditionEvaluator {
    /// Create an evaluator over the given market collaborators.
    pub fn new(oracle: Arc<dyn PriceOracle>, resolver: Arc<dyn TokenResolver>) -> Self {
        Self { oracle, resolver }
    }

    /// Check whether the mission's condition is currently met.
    pub async fn evaluate(&self, mission: &Mission) -> Evaluation {
        match self.try_evaluate(mission).await {
            Ok(true) => Evaluation::Met,
            Ok(false) => Evaluation::NotMet,
            Err(error) => {
                tracing::warn!(
                    task_id = %mission.task_id,
                    condition = %mission.condition,
                    %error,
                    "Condition check failed, treating as not met"
                );
                Evaluation::NotMet
            }
        }
    }

    async fn try_evaluate(&self, mission: &Mission) -> anyhow::Result<bool> {
        let spec = &mission.condition_spec;
        // The stored reference may be a symbol; resolve it against the
        // user's holdings every time, never cached on the mission.
        let canonical = self
            .resolver
            .resolve(&mission.user_id, &spec.token)
            .await?;
        let quote = self.oracle.quote(&canonical).await?;

        let observed = if mission.condition.targets_price() {
            quote.price_usd
        } else {
            quote
                .market_cap_usd
                .ok_or_else(|| anyhow::anyhow!("No market cap reported for {canonical}"))?
        };

        let met = if mission.condition.is_low() {
            observed <= spec.target
        } else {
            observed >= spec.target
        };
        tracing::debug!(
            task_id = %mission.task_id,
            condition = %mission.condition,
            observed,
            target = spec.target,
            met,
            "Condition evaluated"
        );
        Ok(met)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConditionKind, ConditionSpec, MissionKind, SwapPayload, SwapSide};
    use crate::market::TokenQuote;
    use async_trait::async_trait;
    use chrono::Utc;

    struct StubMarket {
        price: Option<f64>,
        market_cap: Option<f64>,
    }

    #[async_trait]
    impl PriceOracle for StubMarket {
        async fn quote(&self, _token: &str) -> anyhow::Result<TokenQuote> {
            match self.price {
                Some(price_usd) => Ok(TokenQuote {
                    price_usd,
                    market_cap_usd: self.market_cap,
                }),
                None => anyhow::bail!("oracle down"),
            }
        }
    }

    #[async_trait]
    impl TokenResolver for StubMarket {
        async fn resolve(&self, _user_id: &str, token: &str) -> anyhow::Result<String> {
            Ok(token.to_string())
        }
    }

    fn mission(condition: ConditionKind, target: f64) -> Mission {
        Mission::new(
            "user-1",
            MissionKind::Swap,
            SwapPayload {
                side: SwapSide::Buy,
                amount: 1.0,
                token: "BONK".to_string(),
            },
            condition,
            ConditionSpec {
                token: "BONK".to_string(),
                target,
                provenance: None,
            },
            Utc::now(),
        )
    }

    fn evaluator(price: Option<f64>, cap: Option<f64>) -> ConditionEvaluator {
        let market = Arc::new(StubMarket {
            price,
            market_cap: cap,
        });
        ConditionEvaluator::new(market.clone(), market)
    }

    #[tokio::test]
    async fn test_price_low_boundaries() {
        let ev = evaluator(Some(90.0), None);
        // Exactly at target counts as met.
        assert_eq!(ev.evaluate(&mission(ConditionKind::PriceLow, 90.0)).await, Evaluation::Met);
        assert_eq!(ev.evaluate(&mission(ConditionKind::PriceLow, 89.99)).await, Evaluation::NotMet);
        assert_eq!(ev.evaluate(&mission(ConditionKind::PriceLow, 95.0)).await, Evaluation::Met);
    }

    #[tokio::test]
    async fn test_price_high_boundaries() {
        let ev = evaluator(Some(110.0), None);
        assert_eq!(ev.evaluate(&mission(ConditionKind::PriceHigh, 110.0)).await, Evaluation::Met);
        assert_eq!(ev.evaluate(&mission(ConditionKind::PriceHigh, 110.01)).await, Evaluation::NotMet);
    }

    #[tokio::test]
    async fn test_market_cap_conditions() {
        let ev = evaluator(Some(1.0), Some(500_000.0));
        assert_eq!(
            ev.evaluate(&mission(ConditionKind::MarketCapLow, 600_000.0)).await,
            Evaluation::Met
        );
        assert_eq!(
            ev.evaluate(&mission(ConditionKind::MarketCapHigh, 600_000.0)).await,
            Evaluation::NotMet
        );
    }

    #[tokio::test]
    async fn test_oracle_failure_is_not_met() {
        let ev = evaluator(None, None);
        assert_eq!(
            ev.evaluate(&mission(ConditionKind::PriceLow, 1.0)).await,
            Evaluation::NotMet
        );
    }

    #[tokio::test]
    async fn test_missing_market_cap_is_not_met() {
        let ev = evaluator(Some(1.0), None);
        assert_eq!(
            ev.evaluate(&mission(ConditionKind::MarketCapLow, 1_000_000.0)).await,
            Evaluation::NotMet
        );
    }
}
