//! Research queue: one row per canonical identity, moving through
//! `pending -> processing -> {completed, failed}`.
//!
//! Every read-then-write is a single conditional statement or a transaction
//! whose first statement is a write, so concurrent callers on the same
//! database cannot lose updates or create two entries for one identity.

use chrono::{DateTime, Utc};
use roster_core::{ArtistCandidate, ErrorKind, QueueEntry, QueueStatus, ResearchResult};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::StorageError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("no queue entry for {0}")]
    NotFound(String),
    #[error("invalid queue transition for {identity}: {from} -> {to}")]
    InvalidTransition {
        identity: String,
        from: QueueStatus,
        to: QueueStatus,
    },
    #[error("name {0:?} has no canonical identity")]
    UnresolvableIdentity(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Storage(StorageError::Database(err))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Storage(StorageError::Serialization(err))
    }
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            QueueError::NotFound(_) | QueueError::UnresolvableIdentity(_) => ErrorKind::Parse,
            QueueError::Storage(_) => ErrorKind::Storage,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub researched: usize,
}

const INSERT_ENTRY: &str = r#"
    INSERT INTO research_queue
        (canonical_identity, display_name, source_id, genres, popularity,
         image_ref, external_url, status, added_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?)
    ON CONFLICT(canonical_identity) DO NOTHING
"#;

#[derive(Debug, Clone)]
pub struct ResearchQueue {
    pool: SqlitePool,
}

impl ResearchQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Adds a pending entry unless one already exists for the identity.
    pub async fn enqueue(&self, candidate: &ArtistCandidate) -> Result<bool, QueueError> {
        if !candidate.is_resolvable() {
            return Err(QueueError::UnresolvableIdentity(
                candidate.display_name.clone(),
            ));
        }
        let genres = serde_json::to_string(&candidate.genres)?;
        let result = sqlx::query(INSERT_ENTRY)
            .bind(&candidate.canonical_identity)
            .bind(&candidate.display_name)
            .bind(&candidate.source_id)
            .bind(genres)
            .bind(i64::from(candidate.popularity))
            .bind(&candidate.image_ref)
            .bind(&candidate.external_url)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        let added = result.rows_affected() == 1;
        debug!(identity = %candidate.canonical_identity, added, "enqueue");
        Ok(added)
    }

    /// Enqueues a batch in one transaction and returns how many entries were
    /// created. Unresolvable names are skipped; repeats within the batch
    /// count once.
    pub async fn enqueue_many(&self, candidates: &[ArtistCandidate]) -> Result<usize, QueueError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut added = 0usize;
        for candidate in candidates {
            if !candidate.is_resolvable() {
                warn!(name = %candidate.display_name, "skipping unresolvable artist name");
                continue;
            }
            let genres = serde_json::to_string(&candidate.genres)?;
            let result = sqlx::query(INSERT_ENTRY)
                .bind(&candidate.canonical_identity)
                .bind(&candidate.display_name)
                .bind(&candidate.source_id)
                .bind(genres)
                .bind(i64::from(candidate.popularity))
                .bind(&candidate.image_ref)
                .bind(&candidate.external_url)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            added += result.rows_affected() as usize;
        }
        tx.commit().await?;
        info!(added, submitted = candidates.len(), "research queue populated");
        Ok(added)
    }

    pub async fn entry(&self, identity: &str) -> Result<Option<QueueEntry>, QueueError> {
        let row = sqlx::query("SELECT * FROM research_queue WHERE canonical_identity = ?")
            .bind(identity)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| entry_from_row(&r)).transpose()
    }

    pub async fn list_pending(&self) -> Result<Vec<QueueEntry>, QueueError> {
        self.list_by_status(QueueStatus::Pending).await
    }

    pub async fn list_failed(&self) -> Result<Vec<QueueEntry>, QueueError> {
        self.list_by_status(QueueStatus::Failed).await
    }

    async fn list_by_status(&self, status: QueueStatus) -> Result<Vec<QueueEntry>, QueueError> {
        let rows = sqlx::query(
            "SELECT * FROM research_queue WHERE status = ? ORDER BY added_at, rowid",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn mark_processing(&self, identity: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE research_queue
               SET status = 'processing', processing_at = ?
             WHERE canonical_identity = ? AND status = 'pending'
            "#,
        )
        .bind(Utc::now())
        .bind(identity)
        .execute(&self.pool)
        .await?;
        self.check_transition(result.rows_affected(), identity, QueueStatus::Processing)
            .await
    }

    pub async fn mark_completed(&self, identity: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE research_queue
               SET status = 'completed', completed_at = ?
             WHERE canonical_identity = ? AND status = 'processing'
            "#,
        )
        .bind(Utc::now())
        .bind(identity)
        .execute(&self.pool)
        .await?;
        self.check_transition(result.rows_affected(), identity, QueueStatus::Completed)
            .await
    }

    pub async fn mark_failed(&self, identity: &str, error: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE research_queue
               SET status = 'failed', failed_at = ?, error = ?
             WHERE canonical_identity = ? AND status = 'processing'
            "#,
        )
        .bind(Utc::now())
        .bind(error)
        .bind(identity)
        .execute(&self.pool)
        .await?;
        self.check_transition(result.rows_affected(), identity, QueueStatus::Failed)
            .await
    }

    /// Operator action: put a failed entry back to pending.
    pub async fn reset_failed(&self, identity: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE research_queue
               SET status = 'pending', processing_at = NULL, failed_at = NULL, error = NULL
             WHERE canonical_identity = ? AND status = 'failed'
            "#,
        )
        .bind(identity)
        .execute(&self.pool)
        .await?;
        self.check_transition(result.rows_affected(), identity, QueueStatus::Pending)
            .await?;
        info!(identity, "failed research entry reset to pending");
        Ok(())
    }

    async fn check_transition(
        &self,
        rows_affected: u64,
        identity: &str,
        to: QueueStatus,
    ) -> Result<(), QueueError> {
        if rows_affected == 1 {
            return Ok(());
        }
        match self.entry(identity).await? {
            None => Err(QueueError::NotFound(identity.to_string())),
            Some(entry) => Err(QueueError::InvalidTransition {
                identity: identity.to_string(),
                from: entry.status,
                to,
            }),
        }
    }

    /// Upserts the research result and completes the matching entry in one
    /// transaction. A missing entry is fine; an entry that is not
    /// `processing` (or already `completed`) rolls everything back.
    pub async fn save_result(&self, result: &ResearchResult) -> Result<(), QueueError> {
        let identity = result.canonical_identity.as_str();
        if identity.is_empty() {
            return Err(QueueError::UnresolvableIdentity(String::new()));
        }
        let payload = serde_json::to_string(result)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO research_results (canonical_identity, payload, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(canonical_identity) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(identity)
        .bind(payload)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM research_queue WHERE canonical_identity = ?")
                .bind(identity)
                .fetch_optional(&mut *tx)
                .await?;

        match status.as_deref().map(parse_status).transpose()? {
            None | Some(QueueStatus::Completed) => {}
            Some(QueueStatus::Processing) => {
                sqlx::query(
                    r#"
                    UPDATE research_queue
                       SET status = 'completed', completed_at = ?
                     WHERE canonical_identity = ? AND status = 'processing'
                    "#,
                )
                .bind(now)
                .bind(identity)
                .execute(&mut *tx)
                .await?;
            }
            Some(from) => {
                return Err(QueueError::InvalidTransition {
                    identity: identity.to_string(),
                    from,
                    to: QueueStatus::Completed,
                });
            }
        }

        tx.commit().await?;
        debug!(identity, "research result saved");
        Ok(())
    }

    pub async fn get_result(&self, identity: &str) -> Result<Option<ResearchResult>, QueueError> {
        let payload: Option<String> = sqlx::query_scalar(
            "SELECT payload FROM research_results WHERE canonical_identity = ?",
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payload
            .map(|p| serde_json::from_str::<ResearchResult>(&p))
            .transpose()?)
    }

    /// Drops a cached result so the next run researches the artist again.
    pub async fn invalidate_result(&self, identity: &str) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM research_results WHERE canonical_identity = ?")
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM research_queue GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n = row.try_get::<i64, _>("n")? as usize;
            match parse_status(&status)? {
                QueueStatus::Pending => stats.pending = n,
                QueueStatus::Processing => stats.processing = n,
                QueueStatus::Completed => stats.completed = n,
                QueueStatus::Failed => stats.failed = n,
            }
            stats.total += n;
        }
        let researched: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM research_results")
            .fetch_one(&self.pool)
            .await?;
        stats.researched = researched as usize;
        Ok(stats)
    }

    /// Removes completed entries. Cached results are kept.
    pub async fn cleanup_completed(&self) -> Result<usize, QueueError> {
        let result = sqlx::query("DELETE FROM research_queue WHERE status = 'completed'")
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected() as usize;
        info!(removed, "completed research entries removed");
        Ok(removed)
    }
}

fn parse_status(raw: &str) -> Result<QueueStatus, QueueError> {
    raw.parse::<QueueStatus>()
        .map_err(|e| QueueError::Storage(StorageError::Corrupt(e)))
}

fn entry_from_row(row: &SqliteRow) -> Result<QueueEntry, QueueError> {
    let genres: String = row.try_get("genres")?;
    let status: String = row.try_get("status")?;
    let popularity: i64 = row.try_get("popularity")?;
    Ok(QueueEntry {
        canonical_identity: row.try_get("canonical_identity")?,
        display_name: row.try_get("display_name")?,
        source_id: row.try_get("source_id")?,
        genres: serde_json::from_str(&genres)?,
        popularity: popularity.clamp(0, 100) as u8,
        image_ref: row.try_get("image_ref")?,
        external_url: row.try_get("external_url")?,
        status: parse_status(&status)?,
        added_at: row.try_get::<DateTime<Utc>, _>("added_at")?,
        processing_at: row.try_get("processing_at")?,
        completed_at: row.try_get("completed_at")?,
        failed_at: row.try_get("failed_at")?,
        error: row.try_get("error")?,
    })
}
