//! Sync pipeline for the artist roster: catalog rules, diffing, research,
//! social discovery and the orchestrated run, plus its scheduler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use roster_adapters::{
    build_client, AnthropicClient, AnthropicConfig, BraveSearch, DuckDuckGoSearch, HttpConfig,
    JsonFileCatalog, JsonFilePublished, PublishedCatalogProvider, SearchChain, SpotifyCatalog,
    SpotifyConfig, UpstreamCatalogProvider, WebResearchProvider, WordPressClient, WordPressConfig,
};
use roster_core::SyncRunReport;
use roster_storage::LockMetadata;

pub mod audit;
pub mod config;
pub mod diff;
pub mod orchestrator;
pub mod research;
pub mod rules;
pub mod scheduler;
pub mod social;

pub use audit::{audit_duplicates, DuplicateGroup};
pub use config::SyncConfig;
pub use diff::{compute_diff, CatalogDiff, NearMatch, PublishedIndex, DEFAULT_NEAR_MATCH_THRESHOLD};
pub use orchestrator::{
    Collaborators, OrchestratorSettings, QueuePopulation, RunOptions, StatusSnapshot, SyncError,
    SyncOrchestrator, SyncStores,
};
pub use rules::{CatalogRules, RuleOutcome};
pub use scheduler::{build_scheduler, maybe_build_scheduler};
pub use social::SocialLinkFinder;

pub const CRATE_NAME: &str = "roster-sync";

/// Wires the HTTP adapters, stores and rules described by `config`.
/// Fails with `SyncError::Configuration` before touching anything when a
/// required credential is missing.
pub async fn build_orchestrator(config: &SyncConfig) -> Result<SyncOrchestrator, SyncError> {
    config.validate()?;
    let not_configured = |err: roster_adapters::AdapterError| SyncError::Configuration(err.to_string());
    let stores = open_stores(config).await?;

    let client = build_client(&HttpConfig {
        timeout: config.http_timeout,
        user_agent: Some(config.user_agent.clone()),
    })?;

    let upstream: Arc<dyn UpstreamCatalogProvider> = match &config.upstream_fixture {
        Some(path) => Arc::new(JsonFileCatalog::new("fixture", path.clone())),
        None => {
            let mut spotify = SpotifyConfig::new(
                config.spotify_playlist_id.clone().unwrap_or_default(),
                config.spotify_credentials.clone(),
            );
            spotify.rate_limit = config.rate_limit_policy(spotify.rate_limit.inter_call_delay);
            Arc::new(SpotifyCatalog::new(client.clone(), spotify).map_err(not_configured)?)
        }
    };

    let wordpress = Arc::new(WordPressClient::new(
        client.clone(),
        WordPressConfig::new(
            config.wordpress_url.clone().unwrap_or_default(),
            config.wordpress_api_key.clone(),
        ),
    ));
    let published: Arc<dyn PublishedCatalogProvider> = match &config.published_fixture {
        Some(path) => Arc::new(JsonFilePublished::new(path.clone())),
        None => wordpress.clone(),
    };

    let brave = config.brave_api_key.clone().map(|key| {
        Box::new(BraveSearch::new(client.clone(), key, config.search_delay))
            as Box<dyn WebResearchProvider>
    });
    let search: Arc<dyn WebResearchProvider> = Arc::new(SearchChain::new(
        brave,
        Box::new(DuckDuckGoSearch::new(client.clone(), config.search_delay)),
    ));

    let mut anthropic = AnthropicConfig::new(config.anthropic_api_key.clone().unwrap_or_default());
    anthropic.rate_limit = config.rate_limit_policy(anthropic.rate_limit.inter_call_delay);
    let anthropic = Arc::new(AnthropicClient::new(client, anthropic).map_err(not_configured)?);

    let collaborators = Collaborators {
        upstream,
        published,
        search,
        synthesis: anthropic.clone(),
        content: anthropic,
        images: wordpress.clone(),
        publisher: wordpress,
    };
    let rules = CatalogRules::from_workspace_root_or_default(&config.workspace_root)?;
    let settings = OrchestratorSettings {
        inter_artist_delay: config.inter_artist_delay,
        search_delay: config.search_delay,
        near_match_threshold: DEFAULT_NEAR_MATCH_THRESHOLD,
        lock_metadata: LockMetadata::new(format!("roster-sync:{}", std::process::id())),
    };
    Ok(SyncOrchestrator::new(collaborators, stores, rules, settings))
}

/// Opens the database (creating the data directory and applying
/// migrations) without requiring any provider credentials.
pub async fn open_stores(config: &SyncConfig) -> Result<SyncStores, SyncError> {
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("creating {}", config.data_dir.display()))?;
    let pool = roster_storage::open(&config.database_url).await?;
    Ok(SyncStores::new(pool, config.lock_max_age, config.snapshot_dir()))
}

pub async fn run_sync_once_from_env(options: RunOptions) -> Result<SyncRunReport, SyncError> {
    let config = SyncConfig::from_env();
    let orchestrator = build_orchestrator(&config).await?;
    orchestrator.run(options).await
}

/// Spacing used by tests and offline runs.
pub fn no_delay_settings(owner_id: &str) -> OrchestratorSettings {
    OrchestratorSettings {
        inter_artist_delay: Duration::ZERO,
        search_delay: Duration::ZERO,
        near_match_threshold: DEFAULT_NEAR_MATCH_THRESHOLD,
        lock_metadata: LockMetadata::new(owner_id),
    }
}
