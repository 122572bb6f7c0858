//! Completed sync runs. A row is written once when a run finishes; readers
//! only ever see whole reports.

use chrono::{DateTime, Utc};
use roster_core::{RunStatus, SyncRunReport, SyncStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::StorageError;

#[derive(Debug, Clone)]
pub struct RunStore {
    pool: SqlitePool,
}

impl RunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record_completed(&self, report: &SyncRunReport) -> Result<(), StorageError> {
        self.insert(
            report.run_id,
            report.started_at,
            report.finished_at,
            RunStatus::Completed,
            None,
            Some(report),
        )
        .await
    }

    /// Records a run that stopped before producing a full report.
    pub async fn record_error(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        error: &str,
        partial: Option<&SyncRunReport>,
    ) -> Result<(), StorageError> {
        self.insert(
            run_id,
            started_at,
            Utc::now(),
            RunStatus::Error,
            Some(error),
            partial,
        )
        .await
    }

    async fn insert(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        status: RunStatus,
        error: Option<&str>,
        report: Option<&SyncRunReport>,
    ) -> Result<(), StorageError> {
        let report = report.map(serde_json::to_string).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO sync_runs (run_id, started_at, finished_at, status, error, report)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_id.to_string())
        .bind(started_at)
        .bind(finished_at)
        .bind(status.as_str())
        .bind(error)
        .bind(report)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Status of the most recent run, or `never_run`.
    pub async fn latest(&self) -> Result<SyncStatus, StorageError> {
        let row = sqlx::query(
            "SELECT finished_at, status, error, report FROM sync_runs ORDER BY finished_at DESC, rowid DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => status_from_row(&row),
            None => Ok(SyncStatus::default()),
        }
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<SyncStatus>, StorageError> {
        let rows = sqlx::query(
            "SELECT finished_at, status, error, report FROM sync_runs ORDER BY finished_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit.max(1) as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(status_from_row).collect()
    }
}

fn status_from_row(row: &SqliteRow) -> Result<SyncStatus, StorageError> {
    let status: String = row.try_get("status")?;
    let report: Option<String> = row.try_get("report")?;
    Ok(SyncStatus {
        last_run: Some(row.try_get::<DateTime<Utc>, _>("finished_at")?),
        status: status.parse().map_err(StorageError::Corrupt)?,
        report: report.map(|r| serde_json::from_str(&r)).transpose()?,
        error: row.try_get("error")?,
    })
}
