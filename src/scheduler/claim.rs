//! Lease-based claiming.
//!
//! Claiming is select-then-conditionally-mutate: pick the most urgent due
//! candidate, then attempt an atomic lease write that re-checks pending
//! status and dueness. Losing the write race is routine under multiple
//! workers; the loser just moves to the next candidate.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::domain::{Mission, MissionStatus, WorkerId};
use crate::store::MissionStore;

/// How many lost lease races a single claim tolerates before giving up
/// for this cycle.
const CLAIM_RACE_RETRIES: u32 = 3;

/// Claims due missions for one worker.
pub struct ClaimCoordinator {
    store: Arc<dyn MissionStore>,
    worker: WorkerId,
    lease: Duration,
    batch_size: usize,
}

impl std::fmt::Debug for ClaimCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimCoordinator")
            .field("worker", &self.worker)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl ClaimCoordinator {
    /// Create a coordinator claiming on behalf of `worker`.
    pub fn new(
        store: Arc<dyn MissionStore>,
        worker: WorkerId,
        lease_secs: i64,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            worker,
            lease: Duration::seconds(lease_secs),
            batch_size,
        }
    }

    /// The worker identity leases are taken under.
    #[must_use]
    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    /// Claim up to `batch_size` due missions, stopping early when the
    /// queue runs dry. Store failures end the batch; whatever was already
    /// claimed is returned so it still gets processed.
    pub async fn claim_batch(&self) -> Vec<Mission> {
        let mut claimed = Vec::with_capacity(self.batch_size);
        while claimed.len() < self.batch_size {
            match self.claim_one().await {
                Ok(Some(mission)) => claimed.push(mission),
                Ok(None) => break,
                Err(error) => {
                    tracing::error!(%error, "Claim failed, ending batch");
                    break;
                }
            }
        }
        claimed
    }

    /// Claim the single most urgent due mission, retrying past a few lost
    /// lease races.
    async fn claim_one(&self) -> anyhow::Result<Option<Mission>> {
        for _ in 0..=CLAIM_RACE_RETRIES {
            let now = Utc::now();
            let Some(mut candidate) = self.store.next_due(now).await? else {
                return Ok(None);
            };

            let lease_until = now + self.lease;
            if self
                .store
                .try_lease(&candidate.task_id, &self.worker, lease_until, now)
                .await?
            {
                candidate.status = MissionStatus::Leased;
                candidate.worker_id = Some(self.worker.as_str().to_string());
                candidate.lease_until = Some(lease_until);
                candidate.updated_at = now;
                return Ok(Some(candidate));
            }

            // Another worker got there first; pick a fresh candidate.
            tracing::debug!(task_id = %candidate.task_id, "Lost lease race");
        }
        Ok(None)
    }
}
