//! Upstream catalog snapshots stored as immutable, hash-addressed JSON files
//! with a per-source `latest.json` pointer.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use roster_core::ArtistCandidate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub candidate_count: usize,
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub fetched_at: DateTime<Utc>,
    pub content_hash: String,
    pub candidates: Vec<ArtistCandidate>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LatestPointer {
    relative_path: PathBuf,
    content_hash: String,
    fetched_at: DateTime<Utc>,
    candidate_count: usize,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    fn snapshot_relative_path(&self, source_id: &str, content_hash: &str) -> PathBuf {
        PathBuf::from(source_id).join(format!("{content_hash}.json"))
    }

    fn latest_path(&self, source_id: &str) -> PathBuf {
        self.root.join(source_id).join("latest.json")
    }

    /// Writes the candidate list and moves the `latest` pointer to it.
    pub async fn store(
        &self,
        source_id: &str,
        fetched_at: DateTime<Utc>,
        candidates: &[ArtistCandidate],
    ) -> anyhow::Result<StoredSnapshot> {
        let bytes = serde_json::to_vec_pretty(candidates).context("serializing snapshot")?;
        let content_hash = Self::sha256_hex(&bytes);
        let relative_path = self.snapshot_relative_path(source_id, &content_hash);
        let absolute_path = self.root.join(&relative_path);

        let deduplicated = if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking snapshot path {}", absolute_path.display()))?
        {
            true
        } else {
            write_atomically(&absolute_path, &bytes).await?
        };

        let pointer = LatestPointer {
            relative_path: relative_path.clone(),
            content_hash: content_hash.clone(),
            fetched_at,
            candidate_count: candidates.len(),
        };
        let pointer_bytes = serde_json::to_vec_pretty(&pointer).context("serializing snapshot pointer")?;
        replace_atomically(&self.latest_path(source_id), &pointer_bytes).await?;
        debug!(source_id, %content_hash, count = candidates.len(), deduplicated, "snapshot stored");

        Ok(StoredSnapshot {
            content_hash,
            relative_path,
            absolute_path,
            candidate_count: candidates.len(),
            deduplicated,
        })
    }

    pub async fn latest(&self, source_id: &str) -> anyhow::Result<Option<CachedSnapshot>> {
        let pointer_path = self.latest_path(source_id);
        if !fs::try_exists(&pointer_path)
            .await
            .with_context(|| format!("checking {}", pointer_path.display()))?
        {
            return Ok(None);
        }
        let pointer: LatestPointer = serde_json::from_slice(
            &fs::read(&pointer_path)
                .await
                .with_context(|| format!("reading {}", pointer_path.display()))?,
        )
        .with_context(|| format!("parsing {}", pointer_path.display()))?;

        let snapshot_path = self.root.join(&pointer.relative_path);
        let bytes = fs::read(&snapshot_path)
            .await
            .with_context(|| format!("reading snapshot {}", snapshot_path.display()))?;
        if Self::sha256_hex(&bytes) != pointer.content_hash {
            return Err(anyhow!(
                "snapshot {} does not match its recorded hash",
                snapshot_path.display()
            ));
        }
        let candidates = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing snapshot {}", snapshot_path.display()))?;
        Ok(Some(CachedSnapshot {
            fetched_at: pointer.fetched_at,
            content_hash: pointer.content_hash,
            candidates,
        }))
    }
}

fn temp_path_for(path: &Path, len: usize) -> anyhow::Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("snapshot path {} has no parent", path.display()))?;
    Ok(parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), len)))
}

async fn write_temp(path: &Path, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating snapshot directory {}", parent.display()))?;
    }
    let temp_path = temp_path_for(path, bytes.len())?;
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp snapshot file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp snapshot file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp snapshot file {}", temp_path.display()))?;
    drop(file);
    Ok(temp_path)
}

/// Immutable write. Returns true when another writer got there first.
async fn write_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<bool> {
    let temp_path = write_temp(path, bytes).await?;
    match fs::rename(&temp_path, path).await {
        Ok(()) => Ok(false),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            let _ = fs::remove_file(&temp_path).await;
            Ok(true)
        }
        Err(err) => {
            let _ = fs::remove_file(&temp_path).await;
            Err(err).with_context(|| {
                format!(
                    "atomically renaming temp snapshot {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            })
        }
    }
}

async fn replace_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let temp_path = write_temp(path, bytes).await?;
    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| format!("replacing {}", path.display()));
    }
    Ok(())
}
