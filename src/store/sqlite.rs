//! Sqlite-backed mission store.
//!
//! Missions are independent rows keyed by `task_id` with a secondary index
//! on `(user_id, status)`. Every state transition is a row-level
//! `UPDATE ... WHERE <precondition>` whose `rows_affected` count is the
//! compare-and-swap verdict, so concurrent workers coordinate without any
//! distributed lock. The admission cap is enforced by a single
//! `INSERT ... SELECT ... WHERE count < cap` statement, not a
//! read-then-write check.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;

use crate::domain::{
    ConditionKind, ConditionSpec, Mission, MissionKind, MissionStatus, SwapPayload, WorkerId,
};

use super::{ChangeKind, MissionChange, MissionStore, CHANGE_CHANNEL_CAPACITY};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS missions (
    task_id            TEXT PRIMARY KEY,
    user_id            TEXT NOT NULL,
    kind               TEXT NOT NULL,
    payload            TEXT NOT NULL,
    status             TEXT NOT NULL,
    scheduled_at       TEXT NOT NULL,
    condition_kind     TEXT NOT NULL,
    condition_spec     TEXT NOT NULL,
    checks             INTEGER NOT NULL DEFAULT 0,
    attempts           INTEGER NOT NULL DEFAULT 0,
    max_attempts       INTEGER NOT NULL,
    backoff_secs       INTEGER NOT NULL,
    check_interval_secs INTEGER NOT NULL,
    priority           INTEGER NOT NULL DEFAULT 0,
    worker_id          TEXT,
    lease_until        TEXT,
    max_wait_until     TEXT NOT NULL,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_missions_user_status ON missions (user_id, status);
CREATE INDEX IF NOT EXISTS idx_missions_due ON missions (status, scheduled_at);
";

/// Sqlite mission store.
#[derive(Clone)]
pub struct SqliteMissionStore {
    pool: SqlitePool,
    changes: broadcast::Sender<MissionChange>,
}

impl std::fmt::Debug for SqliteMissionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMissionStore").finish_non_exhaustive()
    }
}

impl SqliteMissionStore {
    /// Open (creating if needed) a store at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::with_pool(pool).await
    }

    /// Open an in-memory store. Used by tests.
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A single connection so the in-memory database is shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self { pool, changes })
    }

    fn notify(&self, task_id: &str, kind: ChangeKind) {
        let _ = self.changes.send(MissionChange {
            task_id: task_id.to_string(),
            kind,
        });
    }

    fn mission_from_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Mission> {
        let kind: String = row.try_get("kind")?;
        let status: String = row.try_get("status")?;
        let condition: String = row.try_get("condition_kind")?;
        let payload: String = row.try_get("payload")?;
        let condition_spec: String = row.try_get("condition_spec")?;

        Ok(Mission {
            task_id: row.try_get("task_id")?,
            user_id: row.try_get("user_id")?,
            kind: MissionKind::from_str(&kind).map_err(anyhow::Error::msg)?,
            payload: serde_json::from_str::<SwapPayload>(&payload)?,
            status: MissionStatus::from_str(&status).map_err(anyhow::Error::msg)?,
            scheduled_at: row.try_get("scheduled_at")?,
            condition: ConditionKind::from_str(&condition).map_err(anyhow::Error::msg)?,
            condition_spec: serde_json::from_str::<ConditionSpec>(&condition_spec)?,
            checks: row.try_get::<i64, _>("checks")? as u32,
            attempts: row.try_get::<i64, _>("attempts")? as u32,
            max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
            backoff_secs: row.try_get("backoff_secs")?,
            check_interval_secs: row.try_get("check_interval_secs")?,
            priority: row.try_get::<i64, _>("priority")? as i32,
            worker_id: row.try_get("worker_id")?,
            lease_until: row.try_get("lease_until")?,
            max_wait_until: row.try_get("max_wait_until")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl MissionStore for SqliteMissionStore {
    async fn insert(&self, mission: &Mission, max_in_flight: u32) -> anyhow::Result<bool> {
        let payload = serde_json::to_string(&mission.payload)?;
        let condition_spec = serde_json::to_string(&mission.condition_spec)?;

        // The sub-select and the insert run as one statement, so the cap
        // cannot be raced past by concurrent creations.
        let result = sqlx::query(
            r"
            INSERT INTO missions (
                task_id, user_id, kind, payload, status, scheduled_at,
                condition_kind, condition_spec, checks, attempts, max_attempts,
                backoff_secs, check_interval_secs, priority, worker_id,
                lease_until, max_wait_until, created_at, updated_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19
            WHERE (
                SELECT COUNT(*) FROM missions
                WHERE user_id = ?2 AND status IN ('pending', 'leased')
            ) < ?20
            ",
        )
        .bind(&mission.task_id)
        .bind(&mission.user_id)
        .bind(mission.kind.to_string())
        .bind(payload)
        .bind(mission.status.to_string())
        .bind(mission.scheduled_at)
        .bind(mission.condition.to_string())
        .bind(condition_spec)
        .bind(i64::from(mission.checks))
        .bind(i64::from(mission.attempts))
        .bind(i64::from(mission.max_attempts))
        .bind(mission.backoff_secs)
        .bind(mission.check_interval_secs)
        .bind(i64::from(mission.priority))
        .bind(mission.worker_id.as_deref())
        .bind(mission.lease_until)
        .bind(mission.max_wait_until)
        .bind(mission.created_at)
        .bind(mission.updated_at)
        .bind(i64::from(max_in_flight))
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        if inserted {
            self.notify(&mission.task_id, ChangeKind::Created);
        }
        Ok(inserted)
    }

    async fn get(&self, task_id: &str) -> anyhow::Result<Option<Mission>> {
        let row = sqlx::query("SELECT * FROM missions WHERE task_id = ?1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::mission_from_row).transpose()
    }

    async fn next_due(&self, now: DateTime<Utc>) -> anyhow::Result<Option<Mission>> {
        let row = sqlx::query(
            r"
            SELECT * FROM missions
            WHERE status = 'pending' AND scheduled_at <= ?1
            ORDER BY priority DESC, scheduled_at ASC, task_id ASC
            LIMIT 1
            ",
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::mission_from_row).transpose()
    }

    async fn try_lease(
        &self,
        task_id: &str,
        worker: &WorkerId,
        lease_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE missions
            SET status = 'leased', worker_id = ?2, lease_until = ?3, updated_at = ?4
            WHERE task_id = ?1 AND status = 'pending' AND scheduled_at <= ?4
            ",
        )
        .bind(task_id)
        .bind(worker.as_str())
        .bind(lease_until)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if applied {
            self.notify(task_id, ChangeKind::Updated);
        }
        Ok(applied)
    }

    async fn release_for_recheck(
        &self,
        task_id: &str,
        worker: &WorkerId,
        next_check_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE missions
            SET status = 'pending', scheduled_at = ?3, worker_id = NULL,
                lease_until = NULL, checks = checks + 1, updated_at = ?4
            WHERE task_id = ?1 AND status = 'leased' AND worker_id = ?2
            ",
        )
        .bind(task_id)
        .bind(worker.as_str())
        .bind(next_check_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if applied {
            self.notify(task_id, ChangeKind::Updated);
        }
        Ok(applied)
    }

    async fn mark_expired(&self, task_id: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE missions
            SET status = 'failed', worker_id = NULL, lease_until = NULL, updated_at = ?2
            WHERE task_id = ?1 AND status = 'pending'
            ",
        )
        .bind(task_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if applied {
            self.notify(task_id, ChangeKind::Updated);
        }
        Ok(applied)
    }

    async fn complete(
        &self,
        task_id: &str,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE missions
            SET status = 'done', worker_id = NULL, lease_until = NULL,
                attempts = attempts + 1, updated_at = ?3
            WHERE task_id = ?1 AND status = 'leased' AND worker_id = ?2
            ",
        )
        .bind(task_id)
        .bind(worker.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if applied {
            self.notify(task_id, ChangeKind::Updated);
        }
        Ok(applied)
    }

    async fn retry_later(
        &self,
        task_id: &str,
        worker: &WorkerId,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE missions
            SET status = 'pending', scheduled_at = ?3, worker_id = NULL,
                lease_until = NULL, attempts = attempts + 1, updated_at = ?4
            WHERE task_id = ?1 AND status = 'leased' AND worker_id = ?2
            ",
        )
        .bind(task_id)
        .bind(worker.as_str())
        .bind(retry_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if applied {
            self.notify(task_id, ChangeKind::Updated);
        }
        Ok(applied)
    }

    async fn mark_failed(
        &self,
        task_id: &str,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE missions
            SET status = 'failed', worker_id = NULL, lease_until = NULL,
                attempts = attempts + 1, updated_at = ?3
            WHERE task_id = ?1 AND status = 'leased' AND worker_id = ?2
            ",
        )
        .bind(task_id)
        .bind(worker.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if applied {
            self.notify(task_id, ChangeKind::Updated);
        }
        Ok(applied)
    }

    async fn reap_expired_leases(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE missions
            SET status = 'pending', worker_id = NULL, lease_until = NULL, updated_at = ?1
            WHERE status = 'leased' AND lease_until <= ?1
            ",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        let reclaimed = result.rows_affected();
        if reclaimed > 0 {
            self.notify("<reaper>", ChangeKind::Updated);
        }
        Ok(reclaimed)
    }

    async fn list_for_user(&self, user_id: &str, prune: bool) -> anyhow::Result<Vec<Mission>> {
        let rows = sqlx::query(
            "SELECT * FROM missions WHERE user_id = ?1 ORDER BY created_at ASC, task_id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let missions = rows
            .iter()
            .map(Self::mission_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;

        if prune {
            sqlx::query(
                "DELETE FROM missions WHERE user_id = ?1 AND status IN ('done', 'failed')",
            )
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(missions)
    }

    async fn delete(&self, user_id: &str, task_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM missions WHERE task_id = ?1 AND user_id = ?2")
            .bind(task_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() == 1;
        if removed {
            self.notify(task_id, ChangeKind::Deleted);
        }
        Ok(removed)
    }

    async fn count_in_flight(&self, user_id: &str) -> anyhow::Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM missions WHERE user_id = ?1 AND status IN ('pending', 'leased')",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("n")? as u64)
    }

    fn changes(&self) -> broadcast::Receiver<MissionChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConditionKind, MissionKind, SwapPayload, SwapSide};
    use chrono::Duration;

    fn mission(user: &str, now: DateTime<Utc>) -> Mission {
        Mission::new(
            user,
            MissionKind::Swap,
            SwapPayload {
                side: SwapSide::Sell,
                amount: 10.0,
                token: "WIF".to_string(),
            },
            ConditionKind::PriceHigh,
            ConditionSpec {
                token: "WIF".to_string(),
                target: 4.2,
                provenance: None,
            },
            now,
        )
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = SqliteMissionStore::open_in_memory().await.unwrap();
        let now = Utc::now();
        let m = mission("user-1", now);

        assert!(store.insert(&m, 5).await.unwrap());
        let loaded = store.get(&m.task_id).await.unwrap().unwrap();
        assert_eq!(loaded.task_id, m.task_id);
        assert_eq!(loaded.kind, MissionKind::Swap);
        assert_eq!(loaded.condition, ConditionKind::PriceHigh);
        assert_eq!(loaded.payload, m.payload);
        assert_eq!(loaded.condition_spec, m.condition_spec);
        assert_eq!(loaded.status, MissionStatus::Pending);
    }

    #[tokio::test]
    async fn test_capped_insert() {
        let store = SqliteMissionStore::open_in_memory().await.unwrap();
        let now = Utc::now();

        for _ in 0..5 {
            assert!(store.insert(&mission("user-1", now), 5).await.unwrap());
        }
        assert!(!store.insert(&mission("user-1", now), 5).await.unwrap());
        assert_eq!(store.count_in_flight("user-1").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_lease_cas_and_outcomes() {
        let store = SqliteMissionStore::open_in_memory().await.unwrap();
        let now = Utc::now();
        let m = mission("user-1", now);
        store.insert(&m, 5).await.unwrap();

        let a = WorkerId::generate();
        let b = WorkerId::generate();
        let until = now + Duration::seconds(180);

        let candidate = store.next_due(now).await.unwrap().unwrap();
        assert_eq!(candidate.task_id, m.task_id);

        assert!(store.try_lease(&m.task_id, &a, until, now).await.unwrap());
        assert!(!store.try_lease(&m.task_id, &b, until, now).await.unwrap());
        assert!(store.next_due(now).await.unwrap().is_none());

        // Only the lease holder can write an outcome.
        assert!(!store
            .release_for_recheck(&m.task_id, &b, now, now)
            .await
            .unwrap());
        assert!(store
            .release_for_recheck(&m.task_id, &a, now + Duration::seconds(300), now)
            .await
            .unwrap());

        let rechecked = store.get(&m.task_id).await.unwrap().unwrap();
        assert_eq!(rechecked.status, MissionStatus::Pending);
        assert_eq!(rechecked.checks, 1);
        assert!(rechecked.worker_id.is_none());
    }

    #[tokio::test]
    async fn test_reap_and_expiry() {
        let store = SqliteMissionStore::open_in_memory().await.unwrap();
        let now = Utc::now();
        let m = mission("user-1", now);
        store.insert(&m, 5).await.unwrap();

        let worker = WorkerId::generate();
        store
            .try_lease(&m.task_id, &worker, now - Duration::seconds(1), now)
            .await
            .unwrap();
        assert_eq!(store.reap_expired_leases(now).await.unwrap(), 1);

        let reaped = store.get(&m.task_id).await.unwrap().unwrap();
        assert_eq!(reaped.status, MissionStatus::Pending);
        assert_eq!(reaped.attempts, 0);

        assert!(store.mark_expired(&m.task_id, now).await.unwrap());
        let expired = store.get(&m.task_id).await.unwrap().unwrap();
        assert_eq!(expired.status, MissionStatus::Failed);
        // Terminal missions cannot be expired twice.
        assert!(!store.mark_expired(&m.task_id, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_prune_and_delete() {
        let store = SqliteMissionStore::open_in_memory().await.unwrap();
        let now = Utc::now();
        let worker = WorkerId::generate();

        let keep = mission("user-1", now);
        let done = mission("user-1", now);
        store.insert(&keep, 5).await.unwrap();
        store.insert(&done, 5).await.unwrap();
        store
            .try_lease(&done.task_id, &worker, now + Duration::seconds(180), now)
            .await
            .unwrap();
        store.complete(&done.task_id, &worker, now).await.unwrap();

        let listed = store.list_for_user("user-1", true).await.unwrap();
        assert_eq!(listed.len(), 2);
        let after = store.list_for_user("user-1", false).await.unwrap();
        assert_eq!(after.len(), 1);

        assert!(!store.delete("user-2", &keep.task_id).await.unwrap());
        assert!(store.delete("user-1", &keep.task_id).await.unwrap());
    }
}
