//! Collaborator contracts used by the sync pipeline, plus HTTP-backed and
//! file-backed implementations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use roster_core::{
    ArtistCandidate, BilingualContent, ErrorKind, Locale, MediaId, PageRef, PublishedArtist,
    ResearchResult, SocialLinks,
};
use roster_storage::UpstreamError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod anthropic;
pub mod fixture;
pub mod http;
pub mod search;
pub mod spotify;
pub mod tool;
pub mod wordpress;

pub use anthropic::{extract_json_object, AnthropicClient, AnthropicConfig};
pub use fixture::{JsonFileCatalog, JsonFilePublished};
pub use http::{build_client, decode_html_entities, HttpConfig};
pub use search::{BraveSearch, DuckDuckGoSearch, SearchChain};
pub use spotify::{SpotifyCatalog, SpotifyConfig, SpotifyCredential};
pub use tool::ToolReply;
pub use wordpress::{WordPressClient, WordPressConfig};

pub const CRATE_NAME: &str = "roster-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("{provider} is not configured: {detail}")]
    NotConfigured {
        provider: &'static str,
        detail: String,
    },
    #[error("malformed reply from {provider}: {detail}")]
    Parse {
        provider: &'static str,
        detail: String,
    },
    #[error("{provider} rejected the request: {detail}")]
    Rejected {
        provider: &'static str,
        detail: String,
    },
    #[error("published {published:?} but the {missing} page failed: {detail}")]
    PartialPublish {
        published: BTreeMap<Locale, PageRef>,
        missing: Locale,
        detail: String,
    },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AdapterError {
    pub fn parse(provider: &'static str, detail: impl Into<String>) -> Self {
        AdapterError::Parse {
            provider,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::Upstream(err) => err.kind(),
            AdapterError::NotConfigured { .. } => ErrorKind::Configuration,
            AdapterError::Parse { .. } => ErrorKind::Parse,
            AdapterError::Rejected { .. } | AdapterError::PartialPublish { .. } => {
                ErrorKind::Publish
            }
            AdapterError::Anyhow(_) => ErrorKind::TransientNetwork,
        }
    }
}

/// One web search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub description: String,
    pub url: String,
}

#[async_trait]
pub trait UpstreamCatalogProvider: Send + Sync {
    /// Stable name used to key cached snapshots.
    fn provider_id(&self) -> &str;

    async fn fetch_candidates(&self) -> Result<Vec<ArtistCandidate>, AdapterError>;
}

#[async_trait]
pub trait PublishedCatalogProvider: Send + Sync {
    async fn fetch_published(&self) -> Result<Vec<PublishedArtist>, AdapterError>;
}

#[async_trait]
pub trait WebResearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AdapterError>;
}

#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    /// Structures raw search hits. `None` when nothing usable was found.
    async fn synthesize(
        &self,
        candidate: &ArtistCandidate,
        hits: &[SearchHit],
    ) -> Result<Option<ResearchResult>, AdapterError>;
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        candidate: &ArtistCandidate,
        research_text: &str,
    ) -> Result<BilingualContent, AdapterError>;
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn transfer(
        &self,
        image_ref: &str,
        artist_name: &str,
    ) -> Result<Option<MediaId>, AdapterError>;

    async fn find_existing(&self, artist_name: &str) -> Result<Option<MediaId>, AdapterError>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Creates the bilingual page pair and returns one page per locale.
    async fn publish(
        &self,
        candidate: &ArtistCandidate,
        content: &BilingualContent,
        media_id: Option<MediaId>,
        social_links: &SocialLinks,
    ) -> Result<BTreeMap<Locale, PageRef>, AdapterError>;
}
