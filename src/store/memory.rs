//! In-memory mission store.
//!
//! Backs tests and ephemeral deployments. A single `RwLock` over the whole
//! map makes every trait operation atomic, which is exactly the conditional
//! write discipline the sqlite backend gets from row-level `UPDATE`
//! predicates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::domain::{Mission, MissionStatus, WorkerId};

use super::{ChangeKind, MissionChange, MissionStore, CHANGE_CHANNEL_CAPACITY};

/// In-memory mission store.
#[derive(Clone)]
pub struct MemoryMissionStore {
    missions: Arc<RwLock<HashMap<String, Mission>>>,
    changes: broadcast::Sender<MissionChange>,
}

impl std::fmt::Debug for MemoryMissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let missions = self.missions.read();
        f.debug_struct("MemoryMissionStore")
            .field("missions", &missions.len())
            .finish()
    }
}

impl Default for MemoryMissionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMissionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            missions: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }

    fn notify(&self, task_id: &str, kind: ChangeKind) {
        // No subscribers is fine; the send result is irrelevant.
        let _ = self.changes.send(MissionChange {
            task_id: task_id.to_string(),
            kind,
        });
    }

    /// Mutate one mission under the write lock iff `guard` holds.
    ///
    /// Returns whether the guarded write applied.
    fn update_if<G, F>(&self, task_id: &str, guard: G, apply: F) -> bool
    where
        G: FnOnce(&Mission) -> bool,
        F: FnOnce(&mut Mission),
    {
        let applied = {
            let mut missions = self.missions.write();
            match missions.get_mut(task_id) {
                Some(mission) if guard(mission) => {
                    apply(mission);
                    true
                }
                _ => false,
            }
        };
        if applied {
            self.notify(task_id, ChangeKind::Updated);
        }
        applied
    }

    fn holds_lease(mission: &Mission, worker: &WorkerId) -> bool {
        mission.status == MissionStatus::Leased
            && mission.worker_id.as_deref() == Some(worker.as_str())
    }
}

#[async_trait]
impl MissionStore for MemoryMissionStore {
    async fn insert(&self, mission: &Mission, max_in_flight: u32) -> anyhow::Result<bool> {
        let inserted = {
            let mut missions = self.missions.write();
            let in_flight = missions
                .values()
                .filter(|m| m.user_id == mission.user_id && m.status.is_in_flight())
                .count() as u32;
            if in_flight >= max_in_flight {
                false
            } else {
                missions.insert(mission.task_id.clone(), mission.clone());
                true
            }
        };
        if inserted {
            self.notify(&mission.task_id, ChangeKind::Created);
        }
        Ok(inserted)
    }

    async fn get(&self, task_id: &str) -> anyhow::Result<Option<Mission>> {
        Ok(self.missions.read().get(task_id).cloned())
    }

    async fn next_due(&self, now: DateTime<Utc>) -> anyhow::Result<Option<Mission>> {
        let missions = self.missions.read();
        let candidate = missions
            .values()
            .filter(|m| m.is_due(now))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.scheduled_at.cmp(&b.scheduled_at))
                    .then(a.task_id.cmp(&b.task_id))
            })
            .cloned();
        Ok(candidate)
    }

    async fn try_lease(
        &self,
        task_id: &str,
        worker: &WorkerId,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        Ok(self.update_if(
            task_id,
            |m| m.is_due(now),
            |m| {
                m.status = MissionStatus::Leased;
                m.worker_id = Some(worker.as_str().to_string());
                m.lease_until = Some(lease_until);
                m.updated_at = now;
            },
        ))
    }

    async fn release_for_recheck(
        &self,
        task_id: &str,
        worker: &WorkerId,
        next_check_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        Ok(self.update_if(
            task_id,
            |m| Self::holds_lease(m, worker),
            |m| {
                m.status = MissionStatus::Pending;
                m.scheduled_at = next_check_at;
                m.worker_id = None;
                m.lease_until = None;
                m.checks += 1;
                m.updated_at = now;
            },
        ))
    }

    async fn mark_expired(&self, task_id: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        Ok(self.update_if(
            task_id,
            |m| m.status == MissionStatus::Pending,
            |m| {
                m.status = MissionStatus::Failed;
                m.worker_id = None;
                m.lease_until = None;
                m.updated_at = now;
            },
        ))
    }

    async fn complete(
        &self,
        task_id: &str,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        Ok(self.update_if(
            task_id,
            |m| Self::holds_lease(m, worker),
            |m| {
                m.status = MissionStatus::Done;
                m.worker_id = None;
                m.lease_until = None;
                m.attempts += 1;
                m.updated_at = now;
            },
        ))
    }

    async fn retry_later(
        &self,
        task_id: &str,
        worker: &WorkerId,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        Ok(self.update_if(
            task_id,
            |m| Self::holds_lease(m, worker),
            |m| {
                m.status = MissionStatus::Pending;
                m.scheduled_at = retry_at;
                m.worker_id = None;
                m.lease_until = None;
                m.attempts += 1;
                m.updated_at = now;
            },
        ))
    }

    async fn mark_failed(
        &self,
        task_id: &str,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        Ok(self.update_if(
            task_id,
            |m| Self::holds_lease(m, worker),
            |m| {
                m.status = MissionStatus::Failed;
                m.worker_id = None;
                m.lease_until = None;
                m.attempts += 1;
                m.updated_at = now;
            },
        ))
    }

    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let reclaimed: Vec<String> = {
            let mut missions = self.missions.write();
            let mut ids = Vec::new();
            for mission in missions.values_mut() {
                if mission.lease_expired(now) {
                    mission.status = MissionStatus::Pending;
                    mission.worker_id = None;
                    mission.lease_until = None;
                    mission.updated_at = now;
                    ids.push(mission.task_id.clone());
                }
            }
            ids
        };
        for task_id in &reclaimed {
            self.notify(task_id, ChangeKind::Updated);
        }
        Ok(reclaimed.len() as u64)
    }

    async fn list_for_user(&self, user_id: &str, prune: bool) -> anyhow::Result<Vec<Mission>> {
        let mut listed: Vec<Mission> = {
            let missions = self.missions.read();
            missions
                .values()
                .filter(|m| m.user_id == user_id)
                .cloned()
                .collect()
        };
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        if prune {
            let mut missions = self.missions.write();
            missions.retain(|_, m| m.user_id != user_id || !m.status.is_terminal());
        }
        Ok(listed)
    }

    async fn delete(&self, user_id: &str, task_id: &str) -> anyhow::Result<bool> {
        let removed = {
            let mut missions = self.missions.write();
            match missions.get(task_id) {
                Some(m) if m.user_id == user_id => {
                    missions.remove(task_id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.notify(task_id, ChangeKind::Deleted);
        }
        Ok(removed)
    }

    async fn count_in_flight(&self, user_id: &str) -> anyhow::Result<u64> {
        let missions = self.missions.read();
        Ok(missions
            .values()
            .filter(|m| m.user_id == user_id && m.status.is_in_flight())
            .count() as u64)
    }

    fn changes(&self) -> broadcast::Receiver<MissionChange> {
        self.changes.subscribe()
    }
}
