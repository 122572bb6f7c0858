//! File-backed catalogs for offline runs and local testing.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use roster_core::{ArtistCandidate, PublishedArtist};
use serde::de::DeserializeOwned;

use crate::{AdapterError, PublishedCatalogProvider, UpstreamCatalogProvider};

async fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, AdapterError> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading fixture {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AdapterError::parse("fixture", format!("{}: {e}", path.display())))
}

/// Reads candidates from a JSON array of `ArtistCandidate` records.
#[derive(Debug, Clone)]
pub struct JsonFileCatalog {
    provider_id: String,
    path: PathBuf,
}

impl JsonFileCatalog {
    pub fn new(provider_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            provider_id: provider_id.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl UpstreamCatalogProvider for JsonFileCatalog {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn fetch_candidates(&self) -> Result<Vec<ArtistCandidate>, AdapterError> {
        read_json_file(&self.path).await
    }
}

#[derive(Debug, Clone)]
pub struct JsonFilePublished {
    path: PathBuf,
}

impl JsonFilePublished {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PublishedCatalogProvider for JsonFilePublished {
    async fn fetch_published(&self) -> Result<Vec<PublishedArtist>, AdapterError> {
        read_json_file(&self.path).await
    }
}
