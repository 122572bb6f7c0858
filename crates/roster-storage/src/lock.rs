//! Process-wide sync lock backed by a single row in `sync_lock`.
//!
//! Acquisition is one conditional upsert: it inserts the row, or replaces it
//! when the current holder is older than its max age. Every process pointed
//! at the same database sees the same lock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use roster_core::SyncLockInfo;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::StorageError;

pub const DEFAULT_LOCK_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Who is asking for the lock.
#[derive(Debug, Clone)]
pub struct LockMetadata {
    pub owner_id: String,
    pub owner_pid: u32,
}

impl LockMetadata {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            owner_pid: std::process::id(),
        }
    }
}

impl Default for LockMetadata {
    fn default() -> Self {
        Self::new("roster")
    }
}

#[derive(Debug)]
pub struct SyncLock {
    pool: SqlitePool,
    max_age: Duration,
    held: Mutex<Option<String>>,
}

impl SyncLock {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_max_age(pool, DEFAULT_LOCK_MAX_AGE)
    }

    pub fn with_max_age(pool: SqlitePool, max_age: Duration) -> Self {
        Self {
            pool,
            max_age,
            held: Mutex::new(None),
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Returns false if a live lock is held by anyone, including this guard.
    pub async fn acquire(&self, metadata: &LockMetadata) -> Result<bool, StorageError> {
        let now_ms = Utc::now().timestamp_millis();
        let request_id = format!("sync_{}_{}", now_ms, &Uuid::new_v4().simple().to_string()[..9]);
        let previous = self.info().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO sync_lock (id, request_id, owner_pid, owner_id, acquired_at_ms, max_age_ms)
            VALUES (1, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                request_id = excluded.request_id,
                owner_pid = excluded.owner_pid,
                owner_id = excluded.owner_id,
                acquired_at_ms = excluded.acquired_at_ms,
                max_age_ms = excluded.max_age_ms
            WHERE sync_lock.acquired_at_ms + sync_lock.max_age_ms <= excluded.acquired_at_ms
            "#,
        )
        .bind(&request_id)
        .bind(i64::from(metadata.owner_pid))
        .bind(&metadata.owner_id)
        .bind(now_ms)
        .bind(self.max_age.as_millis() as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Ok(false);
        }

        if let Some(stale) = previous {
            warn!(
                stale_request_id = %stale.request_id,
                stale_owner = %stale.owner_id,
                age_seconds = stale.age_seconds,
                "replaced abandoned sync lock"
            );
        }
        info!(%request_id, owner = %metadata.owner_id, "sync lock acquired");
        *self.held.lock().await = Some(request_id);
        Ok(true)
    }

    /// Releases the lease this guard holds. Returns false when there was
    /// nothing to release.
    pub async fn release(&self) -> Result<bool, StorageError> {
        let mut held = self.held.lock().await;
        let Some(request_id) = held.take() else {
            return Ok(false);
        };
        let result = sqlx::query("DELETE FROM sync_lock WHERE id = 1 AND request_id = ?")
            .bind(&request_id)
            .execute(&self.pool)
            .await?;
        let released = result.rows_affected() == 1;
        if released {
            info!(%request_id, "sync lock released");
        } else {
            warn!(%request_id, "sync lock was already taken over or removed");
        }
        Ok(released)
    }

    pub async fn is_locked(&self) -> Result<bool, StorageError> {
        Ok(self.info().await?.is_some_and(|info| !info.stale))
    }

    /// Current row, stale or not.
    pub async fn info(&self) -> Result<Option<SyncLockInfo>, StorageError> {
        let row = sqlx::query(
            "SELECT request_id, owner_pid, owner_id, acquired_at_ms, max_age_ms FROM sync_lock WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let acquired_at_ms: i64 = row.try_get("acquired_at_ms")?;
        let max_age_ms: i64 = row.try_get("max_age_ms")?;
        let owner_pid: i64 = row.try_get("owner_pid")?;
        let acquired_at = DateTime::<Utc>::from_timestamp_millis(acquired_at_ms).ok_or_else(|| {
            StorageError::Corrupt(format!("sync_lock.acquired_at_ms out of range: {acquired_at_ms}"))
        })?;
        let age_ms = (Utc::now().timestamp_millis() - acquired_at_ms).max(0);

        Ok(Some(SyncLockInfo {
            request_id: row.try_get("request_id")?,
            owner_pid: owner_pid.clamp(0, i64::from(u32::MAX)) as u32,
            owner_id: row.try_get("owner_id")?,
            acquired_at,
            max_age_seconds: (max_age_ms / 1000).max(0) as u64,
            age_seconds: (age_ms / 1000) as u64,
            stale: age_ms >= max_age_ms,
        }))
    }

    /// Removes the lock regardless of owner or age.
    pub async fn force_release(&self) -> Result<bool, StorageError> {
        let existing = self.info().await?;
        let result = sqlx::query("DELETE FROM sync_lock WHERE id = 1")
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected() == 1;
        if let Some(info) = existing.filter(|_| removed) {
            warn!(
                request_id = %info.request_id,
                owner = %info.owner_id,
                owner_pid = info.owner_pid,
                age_seconds = info.age_seconds,
                "sync lock force-released"
            );
        }
        self.held.lock().await.take();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_pool;

    #[tokio::test]
    async fn only_one_concurrent_acquire_wins() {
        let (_dir, pool) = temp_pool().await;
        let a = SyncLock::new(pool.clone());
        let b = SyncLock::new(pool);
        let meta = LockMetadata::new("test");

        let (ra, rb) = tokio::join!(a.acquire(&meta), b.acquire(&meta));
        let wins = [ra.unwrap(), rb.unwrap()].iter().filter(|x| **x).count();
        assert_eq!(wins, 1);
        assert!(a.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn live_lock_blocks_even_the_same_guard() {
        let (_dir, pool) = temp_pool().await;
        let lock = SyncLock::new(pool);
        let meta = LockMetadata::default();
        assert!(lock.acquire(&meta).await.unwrap());
        assert!(!lock.acquire(&meta).await.unwrap());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (_dir, pool) = temp_pool().await;
        let lock = SyncLock::new(pool);
        assert!(!lock.release().await.unwrap());
        assert!(lock.acquire(&LockMetadata::default()).await.unwrap());
        assert!(lock.release().await.unwrap());
        assert!(!lock.release().await.unwrap());
        assert!(!lock.is_locked().await.unwrap());
        assert!(lock.info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_lock_is_replaced() {
        let (_dir, pool) = temp_pool().await;
        let crashed = SyncLock::with_max_age(pool.clone(), Duration::from_millis(1));
        assert!(crashed.acquire(&LockMetadata::new("crashed")).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let info = crashed.info().await.unwrap().unwrap();
        assert!(info.stale);
        assert!(!crashed.is_locked().await.unwrap());

        let next = SyncLock::new(pool);
        assert!(next.acquire(&LockMetadata::new("next")).await.unwrap());
        let info = next.info().await.unwrap().unwrap();
        assert_eq!(info.owner_id, "next");
        assert!(!info.stale);

        // The crashed holder no longer owns the row it would delete.
        assert!(!crashed.release().await.unwrap());
        assert!(next.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn force_release_ignores_ownership() {
        let (_dir, pool) = temp_pool().await;
        let holder = SyncLock::new(pool.clone());
        let operator = SyncLock::new(pool);
        assert!(holder.acquire(&LockMetadata::new("holder")).await.unwrap());

        assert!(operator.force_release().await.unwrap());
        assert!(!operator.is_locked().await.unwrap());
        assert!(!operator.force_release().await.unwrap());
    }
}
