//! Execution-side collaborators.
//!
//! The action itself (the swap) is delegated to an external execution
//! service. The lease model is at-least-once: a worker can die after the
//! action lands but before the status write, and the reaper will hand the
//! mission to another worker. The execution service MUST therefore be
//! idempotent or return a distinguishable already-applied result for a
//! repeated request.

pub mod http;

pub use http::{HttpActivityRecorder, HttpExecutionClient};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{MissionKind, SwapSide};

/// Signing credentials resolved for one user, opaque to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials(pub String);

/// A fully oriented swap order handed to the execution service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapOrder {
    /// Asset being spent.
    pub from: String,
    /// Asset being acquired.
    pub to: String,
    /// Amount of `from`, in its native units.
    pub amount: f64,
}

/// Result of a successful execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    /// Transaction identifier on the venue/chain.
    pub transaction_id: String,
    /// Amount actually spent, when reported.
    pub amount_from: Option<f64>,
    /// USD value of the spent amount, when reported.
    pub usd_amount: Option<f64>,
}

/// Executes the financial action once a mission's trigger fires.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Execute a swap on behalf of the credential holder.
    ///
    /// Must be safe to retry.
    async fn execute_swap(
        &self,
        order: &SwapOrder,
        credentials: &Credentials,
    ) -> anyhow::Result<ExecutionReceipt>;
}

/// One audit entry describing a completed mission action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Which action produced the entry.
    pub kind: MissionKind,
    /// Trade direction, for swap entries.
    pub side: SwapSide,
    /// Token that was traded.
    pub token: String,
    /// Amount spent, when reported by the venue.
    pub amount: Option<f64>,
    /// USD value of the spent amount, when reported.
    pub usd_amount: Option<f64>,
    /// Transaction identifier.
    pub txid: String,
}

/// Fire-and-forget audit sink.
///
/// A recording failure must never roll back a completed mission; callers
/// log and move on.
#[async_trait]
pub trait ActivityRecorder: Send + Sync {
    /// Record an activity entry for `user_id`.
    async fn record(&self, user_id: &str, entry: &ActivityEntry) -> anyhow::Result<()>;
}

/// Maps the opaque per-user key stored on a mission back to signing
/// credentials for the execution service.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve credentials for `user_id`.
    async fn credentials_for(&self, user_id: &str) -> anyhow::Result<Credentials>;
}
