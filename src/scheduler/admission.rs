//! Mission admission: validation, target resolution, capped insert.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::domain::{
    ConditionKind, ConditionSpec, Mission, MissionKind, SwapPayload, TargetProvenance,
};
use crate::market::PriceOracle;
use crate::store::MissionStore;

/// Decimal places a resolved price target is rounded to.
const PRICE_DECIMALS: i32 = 8;

/// Errors surfaced synchronously to the creating caller. The mission is
/// never persisted when any of these fire.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// A required payload field is missing or empty.
    #[error("There is not enough info: missing {0}")]
    MissingField(&'static str),

    /// Neither an absolute target nor a percent was provided.
    #[error("Provide an absolute target or a percent for {0}")]
    MissingTarget(ConditionKind),

    /// A provided value is out of range.
    #[error("Invalid {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Only percentage-relative targets need a live quote; this fires when
    /// that lookup fails.
    #[error("Failed to fetch current {quantity} for {token}")]
    QuoteUnavailable {
        /// "price" or "market cap".
        quantity: &'static str,
        /// The token whose quote was requested.
        token: String,
    },

    /// The action kind has no dispatch route yet.
    #[error("Unsupported mission kind: {0}")]
    UnsupportedKind(MissionKind),

    /// The atomic capped insert did not apply.
    #[error("Mission limit reached: too many missions pending or in progress")]
    CapacityExceeded,

    /// Store backend failure.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Trigger parameters as submitted by the caller: either an absolute
/// target or a percentage move relative to the current quote.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionRequest {
    /// Token the condition watches (symbol or canonical identifier).
    pub token: Option<String>,
    /// Absolute price threshold, for price conditions.
    pub target_price: Option<f64>,
    /// Absolute market-cap threshold, for market-cap conditions.
    pub target_cap: Option<f64>,
    /// Relative move in percent; sign is ignored, the condition kind
    /// decides the direction.
    pub percent: Option<f64>,
}

/// A mission creation request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMission {
    /// Opaque key of the requesting user.
    pub user_id: String,
    /// Action to schedule.
    pub kind: MissionKind,
    /// Action parameters.
    pub payload: SwapPayload,
    /// Trigger kind.
    pub condition: ConditionKind,
    /// Trigger parameters.
    pub condition_payload: ConditionRequest,
    /// Optional deadline override in days (clamped to 30).
    pub max_wait_days: Option<i64>,
    /// Optional claim priority.
    pub priority: Option<i32>,
}

/// Validates creation requests, resolves percentage-relative targets into
/// absolute snapshot values, and enforces the per-user in-flight cap
/// atomically at insert time.
pub struct AdmissionController {
    store: Arc<dyn MissionStore>,
    oracle: Arc<dyn PriceOracle>,
    max_in_flight: u32,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("max_in_flight", &self.max_in_flight)
            .finish_non_exhaustive()
    }
}

impl AdmissionController {
    /// Create a controller over `store`, resolving percentage targets via
    /// `oracle`.
    pub fn new(
        store: Arc<dyn MissionStore>,
        oracle: Arc<dyn PriceOracle>,
        max_in_flight: u32,
    ) -> Self {
        Self {
            store,
            oracle,
            max_in_flight,
        }
    }

    /// Validate and persist a new mission.
    pub async fn create(&self, request: CreateMission) -> Result<Mission, AdmissionError> {
        if request.user_id.is_empty() {
            return Err(AdmissionError::MissingField("userId"));
        }
        if request.kind != MissionKind::Swap {
            return Err(AdmissionError::UnsupportedKind(request.kind));
        }
        validate_swap_payload(&request.payload)?;

        let now = Utc::now();
        let spec = self
            .resolve_condition(request.condition, &request.condition_payload, now)
            .await?;

        let mut mission = Mission::new(
            request.user_id,
            request.kind,
            request.payload,
            request.condition,
            spec,
            now,
        );
        if let Some(days) = request.max_wait_days {
            if days <= 0 {
                return Err(AdmissionError::Invalid {
                    field: "maxWaitDays",
                    reason: format!("must be positive, got {days}"),
                });
            }
            mission = mission.with_max_wait_days(days);
        }
        if let Some(priority) = request.priority {
            mission = mission.with_priority(priority);
        }

        let inserted = self.store.insert(&mission, self.max_in_flight).await?;
        if !inserted {
            return Err(AdmissionError::CapacityExceeded);
        }

        tracing::info!(
            task_id = %mission.task_id,
            condition = %mission.condition,
            target = mission.condition_spec.target,
            "Mission admitted"
        );
        Ok(mission)
    }

    /// Resolve the submitted trigger parameters into an absolute target.
    ///
    /// A percentage-relative request is resolved exactly once, here,
    /// against the quote observed now; evaluation never re-derives it.
    async fn resolve_condition(
        &self,
        condition: ConditionKind,
        payload: &ConditionRequest,
        now: DateTime<Utc>,
    ) -> Result<ConditionSpec, AdmissionError> {
        let token = payload
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(AdmissionError::MissingField("token"))?;

        let absolute = if condition.targets_price() {
            payload.target_price
        } else {
            payload.target_cap
        };

        if let Some(target) = absolute {
            if !target.is_finite() || target <= 0.0 {
                return Err(AdmissionError::Invalid {
                    field: "target",
                    reason: format!("must be a positive number, got {target}"),
                });
            }
            return Ok(ConditionSpec {
                token: token.to_string(),
                target,
                provenance: None,
            });
        }

        let Some(percent) = payload.percent else {
            return Err(AdmissionError::MissingTarget(condition));
        };
        if !percent.is_finite() || percent == 0.0 {
            return Err(AdmissionError::Invalid {
                field: "percent",
                reason: format!("must be a non-zero number, got {percent}"),
            });
        }
        let percent = percent.abs();

        let (quantity, base) = if condition.targets_price() {
            let quote =
                self.oracle
                    .quote(token)
                    .await
                    .map_err(|_| AdmissionError::QuoteUnavailable {
                        quantity: "price",
                        token: token.to_string(),
                    })?;
            ("price", quote.price_usd)
        } else {
            let quote =
                self.oracle
                    .quote(token)
                    .await
                    .map_err(|_| AdmissionError::QuoteUnavailable {
                        quantity: "market cap",
                        token: token.to_string(),
                    })?;
            let cap = quote
                .market_cap_usd
                .ok_or_else(|| AdmissionError::QuoteUnavailable {
                    quantity: "market cap",
                    token: token.to_string(),
                })?;
            ("market cap", cap)
        };

        if !base.is_finite() || base <= 0.0 {
            return Err(AdmissionError::QuoteUnavailable {
                quantity,
                token: token.to_string(),
            });
        }

        let factor = if condition.is_low() {
            1.0 - percent / 100.0
        } else {
            1.0 + percent / 100.0
        };
        let target = if condition.targets_price() {
            round_price(base * factor)
        } else {
            (base * factor).round()
        };

        Ok(ConditionSpec {
            token: token.to_string(),
            target,
            provenance: Some(TargetProvenance {
                percent,
                base,
                computed_at: now,
            }),
        })
    }
}

fn validate_swap_payload(payload: &SwapPayload) -> Result<(), AdmissionError> {
    if payload.token.is_empty() {
        return Err(AdmissionError::MissingField("token"));
    }
    if !payload.amount.is_finite() || payload.amount <= 0.0 {
        return Err(AdmissionError::Invalid {
            field: "amount",
            reason: format!("must be a positive number, got {}", payload.amount),
        });
    }
    Ok(())
}

/// Round a USD price to a fixed number of decimal places.
fn round_price(value: f64) -> f64 {
    let scale = 10f64.powi(PRICE_DECIMALS);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MissionStatus, SwapSide};
    use crate::market::TokenQuote;
    use crate::store::MemoryMissionStore;
    use async_trait::async_trait;

    /// Oracle returning a fixed quote, or failing when `price` is `None`.
    struct FixedOracle {
        price: Option<f64>,
        market_cap: Option<f64>,
    }

    #[async_trait]
    impl PriceOracle for FixedOracle {
        async fn quote(&self, _token: &str) -> anyhow::Result<TokenQuote> {
            match self.price {
                Some(price_usd) => Ok(TokenQuote {
                    price_usd,
                    market_cap_usd: self.market_cap,
                }),
                None => anyhow::bail!("oracle unavailable"),
            }
        }
    }

    fn controller(price: Option<f64>, cap: Option<f64>) -> AdmissionController {
        AdmissionController::new(
            Arc::new(MemoryMissionStore::new()),
            Arc::new(FixedOracle {
                price,
                market_cap: cap,
            }),
            5,
        )
    }

    fn request(condition: ConditionKind, payload: ConditionRequest) -> CreateMission {
        CreateMission {
            user_id: "user-1".to_string(),
            kind: MissionKind::Swap,
            payload: SwapPayload {
                side: SwapSide::Buy,
                amount: 2.0,
                token: "BONK".to_string(),
            },
            condition,
            condition_payload: payload,
            max_wait_days: None,
            priority: None,
        }
    }

    #[tokio::test]
    async fn test_absolute_target_needs_no_oracle() {
        // A failing oracle proves absolute mode never performs a lookup.
        let ctl = controller(None, None);
        let mission = ctl
            .create(request(
                ConditionKind::PriceLow,
                ConditionRequest {
                    token: Some("BONK".to_string()),
                    target_price: Some(0.5),
                    target_cap: None,
                    percent: None,
                },
            ))
            .await
            .unwrap();

        assert_eq!(mission.status, MissionStatus::Pending);
        assert_eq!(mission.condition_spec.target, 0.5);
        assert!(mission.condition_spec.provenance.is_none());
    }

    #[tokio::test]
    async fn test_percent_resolves_against_current_price() {
        let ctl = controller(Some(100.0), None);
        let mission = ctl
            .create(request(
                ConditionKind::PriceLow,
                ConditionRequest {
                    token: Some("BONK".to_string()),
                    target_price: None,
                    target_cap: None,
                    percent: Some(10.0),
                },
            ))
            .await
            .unwrap();

        assert_eq!(mission.condition_spec.target, 90.0);
        let provenance = mission.condition_spec.provenance.unwrap();
        assert_eq!(provenance.percent, 10.0);
        assert_eq!(provenance.base, 100.0);
    }

    #[tokio::test]
    async fn test_percent_high_adds() {
        let ctl = controller(Some(2.0), None);
        let mission = ctl
            .create(request(
                ConditionKind::PriceHigh,
                ConditionRequest {
                    token: Some("WIF".to_string()),
                    target_price: None,
                    target_cap: None,
                    percent: Some(-25.0),
                },
            ))
            .await
            .unwrap();

        // Sign on the percent is ignored; HIGH always adds.
        assert_eq!(mission.condition_spec.target, 2.5);
    }

    #[tokio::test]
    async fn test_price_target_rounds_to_eight_decimals() {
        let ctl = controller(Some(0.000_001_234_567_89), None);
        let mission = ctl
            .create(request(
                ConditionKind::PriceLow,
                ConditionRequest {
                    token: Some("BONK".to_string()),
                    target_price: None,
                    target_cap: None,
                    percent: Some(50.0),
                },
            ))
            .await
            .unwrap();

        // 0.00000123456789 * 0.5 = 0.000000617283945, rounded to 8 dp.
        assert_eq!(mission.condition_spec.target, 0.000_000_62);
    }

    #[tokio::test]
    async fn test_cap_target_rounds_to_whole_units() {
        let ctl = controller(Some(1.0), Some(1_234_567.89));
        let mission = ctl
            .create(request(
                ConditionKind::MarketCapLow,
                ConditionRequest {
                    token: Some("BONK".to_string()),
                    target_price: None,
                    target_cap: None,
                    percent: Some(10.0),
                },
            ))
            .await
            .unwrap();

        assert_eq!(mission.condition_spec.target, 1_111_111.0);
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected() {
        let ctl = controller(Some(1.0), None);
        let err = ctl
            .create(request(
                ConditionKind::PriceLow,
                ConditionRequest {
                    token: None,
                    target_price: Some(1.0),
                    target_cap: None,
                    percent: None,
                },
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::MissingField("token")));
    }

    #[tokio::test]
    async fn test_missing_target_and_percent_is_rejected() {
        let ctl = controller(Some(1.0), None);
        let err = ctl
            .create(request(
                ConditionKind::PriceHigh,
                ConditionRequest {
                    token: Some("BONK".to_string()),
                    target_price: None,
                    target_cap: None,
                    percent: None,
                },
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::MissingTarget(_)));
    }

    #[tokio::test]
    async fn test_percent_with_dead_oracle_is_rejected() {
        let ctl = controller(None, None);
        let err = ctl
            .create(request(
                ConditionKind::PriceLow,
                ConditionRequest {
                    token: Some("BONK".to_string()),
                    target_price: None,
                    target_cap: None,
                    percent: Some(10.0),
                },
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::QuoteUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_capacity_exceeded_after_five() {
        let ctl = controller(Some(1.0), None);
        let make = || {
            request(
                ConditionKind::PriceLow,
                ConditionRequest {
                    token: Some("BONK".to_string()),
                    target_price: Some(0.5),
                    target_cap: None,
                    percent: None,
                },
            )
        };
        for _ in 0..5 {
            ctl.create(make()).await.unwrap();
        }
        let err = ctl.create(make()).await.unwrap_err();
        assert!(matches!(err, AdmissionError::CapacityExceeded));
    }

    #[tokio::test]
    async fn test_max_wait_days_clamped() {
        let ctl = controller(Some(1.0), None);
        let mut req = request(
            ConditionKind::PriceLow,
            ConditionRequest {
                token: Some("BONK".to_string()),
                target_price: Some(0.5),
                target_cap: None,
                percent: None,
            },
        );
        req.max_wait_days = Some(365);
        let mission = ctl.create(req).await.unwrap();
        assert_eq!(
            mission.max_wait_until,
            mission.created_at + chrono::Duration::days(30)
        );
    }
}
