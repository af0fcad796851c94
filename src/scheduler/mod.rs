//! The mission scheduler: admission, claiming, evaluation, dispatch, and
//! the background loops that keep the pipeline moving.
//!
//! Assembly happens here; each stage lives in its own submodule and talks
//! to its neighbors through the trait seams in `store`, `market`, and
//! `execution`.

pub mod admission;
pub mod claim;
pub mod dispatch;
pub mod driver;
pub mod evaluate;
pub mod reaper;
pub mod runner;

pub use admission::{AdmissionController, AdmissionError, ConditionRequest, CreateMission};
pub use claim::ClaimCoordinator;
pub use dispatch::ExecutionDispatcher;
pub use driver::WakeupDriver;
pub use evaluate::{ConditionEvaluator, Evaluation};
pub use reaper::LeaseReaper;
pub use runner::MissionRunner;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::SchedulerConfig;
use crate::domain::WorkerId;
use crate::execution::{ActivityRecorder, ExecutionClient, IdentityResolver};
use crate::market::{PriceOracle, TokenResolver};
use crate::store::MissionStore;

/// External collaborators the scheduler is built on.
#[allow(missing_debug_implementations, reason = "all fields are trait objects")]
pub struct Collaborators {
    /// Market data lookup.
    pub oracle: Arc<dyn PriceOracle>,
    /// Symbol-to-canonical-identifier resolution.
    pub resolver: Arc<dyn TokenResolver>,
    /// Swap execution.
    pub executor: Arc<dyn ExecutionClient>,
    /// Audit trail sink.
    pub recorder: Arc<dyn ActivityRecorder>,
    /// Credential resolution.
    pub identity: Arc<dyn IdentityResolver>,
    /// Canonical identifier of the quote asset swaps trade against.
    pub quote_asset: String,
}

/// A fully wired scheduler, ready to spawn its background loops.
pub struct Scheduler {
    driver: Arc<WakeupDriver>,
    reaper: LeaseReaper,
    worker: WorkerId,
}

/// Handles to the scheduler's background loops.
#[derive(Debug)]
pub struct SchedulerHandle {
    driver: JoinHandle<()>,
    reaper: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Abort both loops. Leased missions left behind are recovered by the
    /// next process's reaper once their leases expire.
    pub fn abort(&self) {
        self.driver.abort();
        self.reaper.abort();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Wire a scheduler over `store` with a fresh worker identity.
    pub fn new(
        store: Arc<dyn MissionStore>,
        collaborators: Collaborators,
        config: &SchedulerConfig,
    ) -> Self {
        let worker = WorkerId::generate();
        let evaluator = ConditionEvaluator::new(collaborators.oracle, collaborators.resolver);
        let dispatcher = ExecutionDispatcher::new(
            collaborators.executor,
            collaborators.recorder,
            collaborators.identity,
            collaborators.quote_asset,
        );
        let runner = Arc::new(MissionRunner::new(store.clone(), evaluator, dispatcher));
        let claimer = ClaimCoordinator::new(
            store.clone(),
            worker.clone(),
            config.lease_secs,
            config.batch_size,
        );
        let driver = Arc::new(WakeupDriver::new(
            store.clone(),
            claimer,
            runner,
            config.worker_concurrency,
            Duration::from_secs(config.drain_interval_secs),
        ));
        let reaper = LeaseReaper::new(store, Duration::from_secs(config.reaper_interval_secs));
        Self {
            driver,
            reaper,
            worker,
        }
    }

    /// The worker identity this scheduler claims under.
    #[must_use]
    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    /// Spawn the wake-up and reaper loops.
    pub fn spawn(self) -> SchedulerHandle {
        tracing::info!(worker = %self.worker, "Starting scheduler loops");
        SchedulerHandle {
            driver: tokio::spawn(self.driver.run()),
            reaper: tokio::spawn(self.reaper.run()),
        }
    }
}
