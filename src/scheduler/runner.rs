//! Per-mission processing: evaluate, then settle exactly one outcome.
//!
//! Every outcome write is guarded by the worker identity, so a worker
//! whose lease was reaped mid-flight finds its writes simply not applying
//! and walks away. Only the deadline flip is unguarded by worker: it runs
//! right after the lease was released and re-checks pending status instead.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::domain::{Mission, WorkerId};
use crate::scheduler::dispatch::ExecutionDispatcher;
use crate::scheduler::evaluate::{ConditionEvaluator, Evaluation};
use crate::store::MissionStore;

/// Processes one leased mission to a single outcome.
pub struct MissionRunner {
    store: Arc<dyn MissionStore>,
    evaluator: ConditionEvaluator,
    dispatcher: ExecutionDispatcher,
}

impl std::fmt::Debug for MissionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MissionRunner").finish_non_exhaustive()
    }
}

impl MissionRunner {
    /// Create a runner settling outcomes through `store`.
    pub fn new(
        store: Arc<dyn MissionStore>,
        evaluator: ConditionEvaluator,
        dispatcher: ExecutionDispatcher,
    ) -> Self {
        Self {
            store,
            evaluator,
            dispatcher,
        }
    }

    /// Process a mission the caller holds a lease on, as `worker`.
    ///
    /// Never propagates errors: a mission that cannot be settled keeps its
    /// lease and the reaper recovers it after expiry.
    pub async fn process(&self, mission: &Mission, worker: &WorkerId) {
        match self.evaluator.evaluate(mission).await {
            Evaluation::NotMet => self.settle_not_met(mission, worker).await,
            Evaluation::Met => self.settle_execution(mission, worker).await,
        }
    }

    /// Not-met path: release back to pending at the next check time, then
    /// separately flip to failed if the deadline has passed.
    async fn settle_not_met(&self, mission: &Mission, worker: &WorkerId) {
        let now = Utc::now();
        let next_check = now + Duration::seconds(mission.check_interval_secs);
        match self
            .store
            .release_for_recheck(&mission.task_id, worker, next_check, now)
            .await
        {
            Ok(true) => {
                tracing::debug!(
                    task_id = %mission.task_id,
                    next_check = %next_check,
                    "Condition not met, rescheduled"
                );
            }
            Ok(false) => {
                // Lease lost to the reaper or the mission was deleted.
                tracing::debug!(task_id = %mission.task_id, "Release did not apply");
                return;
            }
            Err(error) => {
                tracing::error!(task_id = %mission.task_id, %error, "Release failed");
                return;
            }
        }

        if mission.deadline_passed(now) {
            match self.store.mark_expired(&mission.task_id, now).await {
                Ok(true) => {
                    tracing::info!(task_id = %mission.task_id, "Mission expired past deadline");
                }
                Ok(false) => {}
                Err(error) => {
                    tracing::error!(task_id = %mission.task_id, %error, "Expiry write failed");
                }
            }
        }
    }

    /// Met path: execute, then settle done / retry / exhausted.
    async fn settle_execution(&self, mission: &Mission, worker: &WorkerId) {
        match self.dispatcher.dispatch(mission).await {
            Ok(receipt) => {
                let now = Utc::now();
                match self.store.complete(&mission.task_id, worker, now).await {
                    Ok(true) => {
                        tracing::info!(
                            task_id = %mission.task_id,
                            txid = %receipt.transaction_id,
                            "Mission done"
                        );
                    }
                    Ok(false) => {
                        // The action landed but the lease was gone; the
                        // at-least-once contract makes this observable as a
                        // duplicate-capable window, never as lost state.
                        tracing::warn!(
                            task_id = %mission.task_id,
                            txid = %receipt.transaction_id,
                            "Executed but completion did not apply"
                        );
                    }
                    Err(error) => {
                        tracing::error!(task_id = %mission.task_id, %error, "Completion failed");
                    }
                }
            }
            Err(error) => {
                let now = Utc::now();
                let attempts_after = mission.attempts + 1;
                if attempts_after < mission.max_attempts {
                    let retry_at = now + Duration::seconds(mission.backoff_secs);
                    tracing::warn!(
                        task_id = %mission.task_id,
                        attempt = attempts_after,
                        max_attempts = mission.max_attempts,
                        retry_at = %retry_at,
                        %error,
                        "Execution failed, will retry"
                    );
                    if let Err(error) = self
                        .store
                        .retry_later(&mission.task_id, worker, retry_at, now)
                        .await
                    {
                        tracing::error!(task_id = %mission.task_id, %error, "Retry write failed");
                    }
                } else {
                    tracing::warn!(
                        task_id = %mission.task_id,
                        attempts = attempts_after,
                        %error,
                        "Execution retries exhausted"
                    );
                    if let Err(error) =
                        self.store.mark_failed(&mission.task_id, worker, now).await
                    {
                        tracing::error!(task_id = %mission.task_id, %error, "Failure write failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ConditionKind, ConditionSpec, MissionKind, MissionStatus, SwapPayload, SwapSide,
    };
    use crate::execution::{
        ActivityEntry, ActivityRecorder, Credentials, ExecutionClient, ExecutionReceipt,
        IdentityResolver, SwapOrder,
    };
    use crate::market::{PriceOracle, TokenQuote, TokenResolver};
    use crate::store::MemoryMissionStore;
    use async_trait::async_trait;

    struct StubCollaborators {
        price: f64,
        swap_ok: bool,
    }

    #[async_trait]
    impl PriceOracle for StubCollaborators {
        async fn quote(&self, _token: &str) -> anyhow::Result<TokenQuote> {
            Ok(TokenQuote {
                price_usd: self.price,
                market_cap_usd: None,
            })
        }
    }

    #[async_trait]
    impl TokenResolver for StubCollaborators {
        async fn resolve(&self, _user_id: &str, token: &str) -> anyhow::Result<String> {
            Ok(token.to_string())
        }
    }

    #[async_trait]
    impl ExecutionClient for StubCollaborators {
        async fn execute_swap(
            &self,
            _order: &SwapOrder,
            _credentials: &Credentials,
        ) -> anyhow::Result<ExecutionReceipt> {
            if self.swap_ok {
                Ok(ExecutionReceipt {
                    transaction_id: "tx-ok".to_string(),
                    amount_from: None,
                    usd_amount: None,
                })
            } else {
                anyhow::bail!("venue error")
            }
        }
    }

    #[async_trait]
    impl ActivityRecorder for StubCollaborators {
        async fn record(&self, _user_id: &str, _entry: &ActivityEntry) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl IdentityResolver for StubCollaborators {
        async fn credentials_for(&self, _user_id: &str) -> anyhow::Result<Credentials> {
            Ok(Credentials("creds".to_string()))
        }
    }

    fn runner(
        store: Arc<MemoryMissionStore>,
        price: f64,
        swap_ok: bool,
    ) -> MissionRunner {
        let stub = Arc::new(StubCollaborators { price, swap_ok });
        MissionRunner::new(
            store,
            ConditionEvaluator::new(stub.clone(), stub.clone()),
            ExecutionDispatcher::new(stub.clone(), stub.clone(), stub, "QUOTE"),
        )
    }

    fn mission(target: f64) -> Mission {
        Mission::new(
            "user-1",
            MissionKind::Swap,
            SwapPayload {
                side: SwapSide::Buy,
                amount: 1.0,
                token: "BONK".to_string(),
            },
            ConditionKind::PriceLow,
            ConditionSpec {
                token: "BONK".to_string(),
                target,
                provenance: None,
            },
            Utc::now(),
        )
    }

    async fn lease(store: &MemoryMissionStore, m: &Mission, worker: &WorkerId) -> Mission {
        assert!(store.insert(m, 5).await.unwrap());
        let now = Utc::now();
        assert!(store
            .try_lease(&m.task_id, worker, now + Duration::seconds(180), now)
            .await
            .unwrap());
        store.get(&m.task_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_not_met_reschedules_and_counts_check() {
        let store = Arc::new(MemoryMissionStore::new());
        let worker = WorkerId::generate();
        // Price 100, target 50: PRICE_LOW not met.
        let leased = lease(&store, &mission(50.0), &worker).await;
        runner(store.clone(), 100.0, true).process(&leased, &worker).await;

        let after = store.get(&leased.task_id).await.unwrap().unwrap();
        assert_eq!(after.status, MissionStatus::Pending);
        assert_eq!(after.checks, 1);
        assert_eq!(after.attempts, 0);
        assert!(after.scheduled_at > Utc::now() + Duration::seconds(250));
        assert!(after.worker_id.is_none());
    }

    #[tokio::test]
    async fn test_not_met_past_deadline_fails_without_counters() {
        let store = Arc::new(MemoryMissionStore::new());
        let worker = WorkerId::generate();
        let mut m = mission(50.0);
        m.max_wait_until = Utc::now() - Duration::hours(1);
        let leased = lease(&store, &m, &worker).await;
        runner(store.clone(), 100.0, true).process(&leased, &worker).await;

        let after = store.get(&leased.task_id).await.unwrap().unwrap();
        assert_eq!(after.status, MissionStatus::Failed);
        // The recheck release ran first, so the check still counted.
        assert_eq!(after.checks, 1);
        assert_eq!(after.attempts, 0);
    }

    #[tokio::test]
    async fn test_met_and_executed_is_done() {
        let store = Arc::new(MemoryMissionStore::new());
        let worker = WorkerId::generate();
        // Price 100, target 150: PRICE_LOW met.
        let leased = lease(&store, &mission(150.0), &worker).await;
        runner(store.clone(), 100.0, true).process(&leased, &worker).await;

        let after = store.get(&leased.task_id).await.unwrap().unwrap();
        assert_eq!(after.status, MissionStatus::Done);
        assert_eq!(after.attempts, 1);
        assert!(after.worker_id.is_none());
    }

    #[tokio::test]
    async fn test_failed_execution_backs_off() {
        let store = Arc::new(MemoryMissionStore::new());
        let worker = WorkerId::generate();
        let leased = lease(&store, &mission(150.0), &worker).await;
        runner(store.clone(), 100.0, false).process(&leased, &worker).await;

        let after = store.get(&leased.task_id).await.unwrap().unwrap();
        assert_eq!(after.status, MissionStatus::Pending);
        assert_eq!(after.attempts, 1);
        assert!(after.scheduled_at > Utc::now() + Duration::seconds(100));
    }

    #[tokio::test]
    async fn test_final_attempt_exhausts() {
        let store = Arc::new(MemoryMissionStore::new());
        let worker = WorkerId::generate();
        let mut m = mission(150.0);
        m.attempts = m.max_attempts - 1;
        let leased = lease(&store, &m, &worker).await;
        runner(store.clone(), 100.0, false).process(&leased, &worker).await;

        let after = store.get(&leased.task_id).await.unwrap().unwrap();
        assert_eq!(after.status, MissionStatus::Failed);
        assert_eq!(after.attempts, m.max_attempts);
    }

    #[tokio::test]
    async fn test_zombie_worker_cannot_settle() {
        let store = Arc::new(MemoryMissionStore::new());
        let worker = WorkerId::generate();
        let leased = lease(&store, &mission(50.0), &worker).await;

        // The lease expires and the reaper hands the mission back.
        store
            .reap_expired_leases(Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        runner(store.clone(), 100.0, true).process(&leased, &worker).await;

        let after = store.get(&leased.task_id).await.unwrap().unwrap();
        // The zombie's release did not apply: no check counted.
        assert_eq!(after.checks, 0);
        assert_eq!(after.status, MissionStatus::Pending);
    }
}
