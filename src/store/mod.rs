//! Mission persistence.
//!
//! The store is the single source of truth and the coordination point for
//! the worker pool: every mutation is a conditional (optimistic) update
//! scoped to exactly the fields and predicate it needs, never a
//! whole-record overwrite. Methods that perform a guarded write return
//! `Ok(true)` only when the precondition held at write time; a `false`
//! means another worker (or the reaper, or a user deletion) raced ahead
//! and the caller must abandon its transition.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryMissionStore;
pub use sqlite::SqliteMissionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{Mission, WorkerId};

/// Capacity of the change-notification channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A change notification emitted after a successful mission write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionChange {
    /// The mission that changed.
    pub task_id: String,
    /// What happened to it.
    pub kind: ChangeKind,
}

/// Kind of mission store change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A mission was inserted.
    Created,
    /// A mission's state was mutated.
    Updated,
    /// A mission was removed.
    Deleted,
}

/// Durable mission repository with conditional-write semantics.
#[async_trait]
pub trait MissionStore: Send + Sync {
    /// Insert a new mission iff the owner currently has fewer than
    /// `max_in_flight` missions in pending or leased state. The count check
    /// and the insert are a single atomic operation.
    ///
    /// Returns `false` when the cap would be exceeded.
    async fn insert(&self, mission: &Mission, max_in_flight: u32) -> anyhow::Result<bool>;

    /// Fetch a mission by id.
    async fn get(&self, task_id: &str) -> anyhow::Result<Option<Mission>>;

    /// The most urgent due mission across all users: pending,
    /// `scheduled_at <= now`, ordered by priority descending then
    /// `scheduled_at` ascending (ties broken by `task_id`).
    async fn next_due(&self, now: DateTime<Utc>) -> anyhow::Result<Option<Mission>>;

    /// Atomically flip a mission to leased for `worker`, re-checking
    /// pending status and dueness at write time.
    async fn try_lease(
        &self,
        task_id: &str,
        worker: &WorkerId,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Not-met outcome: release the lease held by `worker`, return the
    /// mission to pending at `next_check_at`, and increment `checks`.
    async fn release_for_recheck(
        &self,
        task_id: &str,
        worker: &WorkerId,
        next_check_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Deadline outcome: flip a pending mission to failed. Counters are
    /// untouched. Applied after `release_for_recheck` when `max_wait_until`
    /// has passed.
    async fn mark_expired(&self, task_id: &str, now: DateTime<Utc>) -> anyhow::Result<bool>;

    /// Success outcome: mark done, clear the lease held by `worker`, and
    /// increment `attempts`.
    async fn complete(
        &self,
        task_id: &str,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Retry outcome: return to pending at `retry_at`, clear the lease held
    /// by `worker`, and increment `attempts`.
    async fn retry_later(
        &self,
        task_id: &str,
        worker: &WorkerId,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Exhaustion outcome: mark failed, clear the lease held by `worker`,
    /// and increment `attempts`.
    async fn mark_failed(
        &self,
        task_id: &str,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Reset every leased mission whose lease expired at or before `now`
    /// back to pending, clearing the lease fields and leaving counters
    /// untouched. Returns how many were reclaimed.
    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;

    /// List a user's missions. With `prune`, terminal missions are deleted
    /// after being included in the result.
    async fn list_for_user(&self, user_id: &str, prune: bool) -> anyhow::Result<Vec<Mission>>;

    /// Delete one mission owned by `user_id`. Returns whether it existed.
    async fn delete(&self, user_id: &str, task_id: &str) -> anyhow::Result<bool>;

    /// Number of the user's missions counting against the admission cap.
    async fn count_in_flight(&self, user_id: &str) -> anyhow::Result<u64>;

    /// Subscribe to change notifications. Fires on every successful
    /// insert or state mutation; lagging subscribers drop events, which is
    /// acceptable because the drain loop also runs on a fallback timer.
    fn changes(&self) -> broadcast::Receiver<MissionChange>;
}
