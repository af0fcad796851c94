//! Crash recovery for abandoned leases.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::store::MissionStore;

/// Periodically returns expired leases to the pending pool.
///
/// Reaping deliberately touches no counters: the crashed attempt is not
/// charged, and a mission whose worker died after executing but before
/// settling will run again. Idempotent execution is the downstream
/// contract that makes this safe.
pub struct LeaseReaper {
    store: Arc<dyn MissionStore>,
    interval: Duration,
}

impl std::fmt::Debug for LeaseReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseReaper")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl LeaseReaper {
    /// Create a reaper sweeping every `interval`.
    pub fn new(store: Arc<dyn MissionStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run the sweep loop forever.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep_once().await;
        }
    }

    /// One sweep: reset every lease expired as of now.
    pub async fn sweep_once(&self) {
        match self.store.reap_expired_leases(Utc::now()).await {
            Ok(0) => {}
            Ok(reclaimed) => {
                tracing::info!(reclaimed, "Reclaimed expired leases");
            }
            Err(error) => {
                tracing::error!(%error, "Lease sweep failed");
            }
        }
    }
}
