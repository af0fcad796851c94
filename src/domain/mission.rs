//! The mission record and its state vocabulary.
//!
//! A mission is one deferred conditional action: a trigger condition over
//! market data plus the action to run once the trigger fires. Missions are
//! independent, directly addressable records keyed by `task_id`; ownership
//! is tracked by `user_id`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hard cap on execution retries unless the caller overrides it.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Fixed delay before retrying a failed execution, in seconds.
pub const DEFAULT_BACKOFF_SECS: i64 = 120;
/// Delay before re-evaluating an unmet condition, in seconds.
pub const DEFAULT_CHECK_INTERVAL_SECS: i64 = 5 * 60;
/// Default absolute deadline, in days from creation.
pub const DEFAULT_MAX_WAIT_DAYS: i64 = 5;
/// Upper bound a caller may request for the deadline, in days.
pub const MAX_WAIT_DAYS_CAP: i64 = 30;

/// Lifecycle state of a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    /// Eligible for claiming once `scheduled_at` has passed.
    Pending,
    /// Exclusively held by one worker until `lease_until`.
    Leased,
    /// Executed successfully. Terminal.
    Done,
    /// Deadline passed or retries exhausted. Terminal.
    Failed,
}

impl MissionStatus {
    /// Whether this state admits no further transitions (except pruning).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether this state counts against the per-user admission cap.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Leased)
    }
}

impl std::fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Leased => write!(f, "leased"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for MissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "leased" => Ok(Self::Leased),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown mission status: {s}")),
        }
    }
}

/// The action a mission executes once its condition fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionKind {
    /// Swap between the configured quote asset and a token.
    Swap,
    /// Add liquidity to a pool. Reserved; admission rejects it until a
    /// dispatch route exists.
    AddLiquidity,
    /// Remove liquidity from a pool. Reserved; admission rejects it until a
    /// dispatch route exists.
    RemoveLiquidity,
}

impl std::fmt::Display for MissionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Swap => write!(f, "SWAP"),
            Self::AddLiquidity => write!(f, "ADD_LIQUIDITY"),
            Self::RemoveLiquidity => write!(f, "REMOVE_LIQUIDITY"),
        }
    }
}

impl std::str::FromStr for MissionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SWAP" => Ok(Self::Swap),
            "ADD_LIQUIDITY" => Ok(Self::AddLiquidity),
            "REMOVE_LIQUIDITY" => Ok(Self::RemoveLiquidity),
            _ => Err(format!("Unknown mission kind: {s}")),
        }
    }
}

/// Trigger predicate kind over market data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionKind {
    /// Met once the token price is at or below the target.
    PriceLow,
    /// Met once the token price is at or above the target.
    PriceHigh,
    /// Met once the token market cap is at or below the target.
    MarketCapLow,
    /// Met once the token market cap is at or above the target.
    MarketCapHigh,
}

impl ConditionKind {
    /// Whether the target is a price (as opposed to a market cap).
    #[must_use]
    pub const fn targets_price(self) -> bool {
        matches!(self, Self::PriceLow | Self::PriceHigh)
    }

    /// Whether the condition triggers on the observed value falling to or
    /// below the target.
    #[must_use]
    pub const fn is_low(self) -> bool {
        matches!(self, Self::PriceLow | Self::MarketCapLow)
    }
}

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PriceLow => write!(f, "PRICE_LOW"),
            Self::PriceHigh => write!(f, "PRICE_HIGH"),
            Self::MarketCapLow => write!(f, "MARKETCAP_LOW"),
            Self::MarketCapHigh => write!(f, "MARKETCAP_HIGH"),
        }
    }
}

impl std::str::FromStr for ConditionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRICE_LOW" => Ok(Self::PriceLow),
            "PRICE_HIGH" => Ok(Self::PriceHigh),
            "MARKETCAP_LOW" => Ok(Self::MarketCapLow),
            "MARKETCAP_HIGH" => Ok(Self::MarketCapHigh),
            _ => Err(format!("Unknown condition kind: {s}")),
        }
    }
}

/// How a percentage-relative target was resolved into an absolute one.
///
/// Recorded for auditability only; evaluation always uses the absolute
/// `target` and never re-derives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetProvenance {
    /// Requested move relative to the base value, in percent (always positive).
    pub percent: f64,
    /// The price or market cap observed when the target was computed.
    pub base: f64,
    /// When the target was computed.
    pub computed_at: DateTime<Utc>,
}

/// Fully resolved trigger parameters.
///
/// The numeric target is fixed at creation time. A request expressed as a
/// percentage ("drop 20%") is resolved once against the quote observed at
/// creation and stored here as an absolute threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    /// Token reference: a canonical address, or a symbol resolved against
    /// the user's holdings at evaluation time.
    pub token: String,
    /// Absolute trigger threshold (USD price or USD market cap).
    pub target: f64,
    /// Present iff the target was derived from a percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<TargetProvenance>,
}

/// Which direction a swap mission trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapSide {
    /// Spend the quote asset to acquire the token.
    Buy,
    /// Sell the token for the quote asset.
    Sell,
}

impl std::fmt::Display for SwapSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Parameters for a swap action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapPayload {
    /// Trade direction relative to the token.
    pub side: SwapSide,
    /// Amount of the spent asset, in its native units.
    pub amount: f64,
    /// Token being bought or sold.
    pub token: String,
}

/// Identity of one worker process, generated at process start.
///
/// Threaded explicitly through claiming and outcome writes so a zombie
/// worker whose lease was reaped can never overwrite a newer owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    /// Generate a fresh process-lifetime identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("worker-{}", Uuid::new_v4()))
    }

    /// The identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One scheduled conditional action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    /// Unique mission identifier, generated at creation.
    pub task_id: String,
    /// Opaque key of the owning user.
    pub user_id: String,
    /// Action to execute on trigger.
    pub kind: MissionKind,
    /// Action parameters. Currently always a swap payload.
    pub payload: SwapPayload,
    /// Current lifecycle state.
    pub status: MissionStatus,
    /// Earliest time this mission becomes eligible for (re-)evaluation.
    pub scheduled_at: DateTime<Utc>,
    /// Trigger kind.
    pub condition: ConditionKind,
    /// Resolved trigger parameters.
    pub condition_spec: ConditionSpec,
    /// Number of condition evaluations that came back "not met".
    pub checks: u32,
    /// Number of execution attempts (success or failure).
    pub attempts: u32,
    /// Hard cap on execution attempts.
    pub max_attempts: u32,
    /// Fixed delay before retrying a failed execution, in seconds.
    pub backoff_secs: i64,
    /// Delay before re-evaluating an unmet condition, in seconds.
    pub check_interval_secs: i64,
    /// Claim ordering hint; higher is claimed first.
    pub priority: i32,
    /// Worker currently holding the lease, while `status == Leased`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Lease expiry, while `status == Leased`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_until: Option<DateTime<Utc>>,
    /// Absolute terminal deadline.
    pub max_wait_until: DateTime<Utc>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Mission {
    /// Build a new pending mission with standard defaults, scheduled immediately.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        kind: MissionKind,
        payload: SwapPayload,
        condition: ConditionKind,
        condition_spec: ConditionSpec,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            kind,
            payload,
            status: MissionStatus::Pending,
            scheduled_at: now,
            condition,
            condition_spec,
            checks: 0,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_secs: DEFAULT_BACKOFF_SECS,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            priority: 0,
            worker_id: None,
            lease_until: None,
            max_wait_until: now + Duration::days(DEFAULT_MAX_WAIT_DAYS),
            created_at: now,
            updated_at: now,
        }
    }

    /// Override the deadline, in days from `created_at`.
    #[must_use]
    pub fn with_max_wait_days(mut self, days: i64) -> Self {
        self.max_wait_until = self.created_at + Duration::days(days.min(MAX_WAIT_DAYS_CAP));
        self
    }

    /// Override the claim priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether the mission is due for claiming at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == MissionStatus::Pending && self.scheduled_at <= now
    }

    /// Whether the absolute deadline has passed at `now`.
    #[must_use]
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        now > self.max_wait_until
    }

    /// Whether a held lease has silently expired at `now`.
    #[must_use]
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == MissionStatus::Leased
            && self.lease_until.is_some_and(|until| until <= now)
    }
}
