//! The wake-up loop that drives drain cycles.
//!
//! Two signals trigger a drain: a change notification from the store and a
//! fallback timer that catches missed notifications and missions becoming
//! due by clock. Both funnel into one sequential loop, so drain cycles
//! never overlap by construction.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::domain::Mission;
use crate::scheduler::claim::ClaimCoordinator;
use crate::scheduler::runner::MissionRunner;
use crate::store::MissionStore;

/// Drives claim-and-process cycles for one worker.
pub struct WakeupDriver {
    store: Arc<dyn MissionStore>,
    claimer: ClaimCoordinator,
    runner: Arc<MissionRunner>,
    limiter: Arc<Semaphore>,
    fallback_interval: Duration,
}

impl std::fmt::Debug for WakeupDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeupDriver")
            .field("claimer", &self.claimer)
            .field("fallback_interval", &self.fallback_interval)
            .finish_non_exhaustive()
    }
}

impl WakeupDriver {
    /// Create a driver processing at most `concurrency` missions at once.
    pub fn new(
        store: Arc<dyn MissionStore>,
        claimer: ClaimCoordinator,
        runner: Arc<MissionRunner>,
        concurrency: usize,
        fallback_interval: Duration,
    ) -> Self {
        Self {
            store,
            claimer,
            runner,
            limiter: Arc::new(Semaphore::new(concurrency)),
            fallback_interval,
        }
    }

    /// Run the wake-up loop forever, draining immediately on entry so a
    /// restart picks up backlog without waiting for the first tick.
    pub async fn run(self: Arc<Self>) {
        let mut changes = self.store.changes();
        let mut ticker = tokio::time::interval(self.fallback_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval() fires immediately; the first tick is the startup drain.
        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(change) => {
                        tracing::debug!(task_id = %change.task_id, "Woken by store change");
                        self.drain_once().await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Change stream lagged, draining anyway");
                        self.drain_once().await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        tracing::warn!("Change stream closed, falling back to timer only");
                        ticker.tick().await;
                        self.drain_once().await;
                    }
                },
                _ = ticker.tick() => {
                    self.drain_once().await;
                }
            }
        }
    }

    /// One drain cycle: claim a batch and process it with bounded
    /// concurrency, waiting for every mission to settle before returning.
    pub async fn drain_once(&self) {
        let batch = self.claimer.claim_batch().await;
        if batch.is_empty() {
            return;
        }
        tracing::debug!(claimed = batch.len(), "Draining claimed batch");

        let tasks = batch.into_iter().map(|mission| self.process_limited(mission));
        join_all(tasks).await;
    }

    async fn process_limited(&self, mission: Mission) {
        // The semaphore is never closed.
        let Ok(_permit) = self.limiter.acquire().await else {
            return;
        };
        self.runner.process(&mission, self.claimer.worker()).await;
    }
}
