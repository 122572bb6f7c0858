//! Durable state for the roster sync: SQLite-backed research queue, sync
//! lock and run history, plus upstream snapshot files and quota handling for
//! outbound HTTP calls.

use std::str::FromStr;
use std::time::Duration;

use roster_core::ErrorKind;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use thiserror::Error;
use tracing::info;

pub mod lock;
pub mod queue;
pub mod quota;
pub mod runs;
pub mod snapshot;

pub use lock::{LockMetadata, SyncLock, DEFAULT_LOCK_MAX_AGE};
pub use queue::{QueueError, QueueStats, ResearchQueue};
pub use quota::{
    classify_status, parse_retry_after, BackoffPolicy, CredentialPool, Pacer, RateLimitPolicy,
    RateLimiter, RetryDisposition, UpstreamError,
};
pub use runs::RunStore;
pub use snapshot::{CachedSnapshot, SnapshotStore, StoredSnapshot};
pub use sqlx::SqlitePool;

pub const CRATE_NAME: &str = "roster-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Storage
    }
}

/// Opens (creating if needed) the SQLite database at `database_url`.
pub async fn connect(database_url: &str) -> Result<SqlitePool, StorageError> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("database migrations applied");
    Ok(())
}

/// Connects and applies pending migrations.
pub async fn open(database_url: &str) -> Result<SqlitePool, StorageError> {
    let pool = connect(database_url).await?;
    migrate(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    pub async fn temp_pool() -> (TempDir, SqlitePool) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("roster.db").display());
        let pool = super::open(&url).await.expect("open database");
        (dir, pool)
    }
}
