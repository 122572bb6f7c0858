//! The sync run: diff the upstream catalog against the published one, then
//! research, write and publish each missing artist in turn.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use roster_adapters::{
    AdapterError, ContentGenerator, ImageProvider, PublishedCatalogProvider, Publisher,
    SearchHit, SynthesisProvider, UpstreamCatalogProvider, WebResearchProvider,
};
use roster_core::{
    ArtistCandidate, ArtistFailure, ErrorKind, MediaId, PublishedArtist, QueueStatus,
    ResearchResult, RunStatus, SocialLinks, SyncLockInfo, SyncRunReport, SyncStatus,
};
use roster_storage::{
    LockMetadata, QueueError, QueueStats, ResearchQueue, RunStore, SnapshotStore, SqlitePool,
    StorageError, SyncLock,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::audit::{audit_duplicates, DuplicateGroup};
use crate::diff::{compute_diff, CatalogDiff, PublishedIndex, DEFAULT_NEAR_MATCH_THRESHOLD};
use crate::research::{degraded_description, format_research, research_queries};
use crate::rules::CatalogRules;
use crate::social::SocialLinkFinder;

const HITS_PER_QUERY: usize = 5;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync run is already in progress (holder: {})", .holder.as_deref().unwrap_or("unknown"))]
    Conflict { holder: Option<String> },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("fetching the upstream catalog failed: {0}")]
    Upstream(#[source] AdapterError),
    #[error("fetching the published catalog failed: {0}")]
    Published(#[source] AdapterError),
    #[error("run aborted at {stage} for {artist}: {message}")]
    Stage {
        artist: String,
        stage: &'static str,
        kind: ErrorKind,
        message: String,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Conflict { .. } => ErrorKind::Conflict,
            SyncError::Configuration(_) => ErrorKind::Configuration,
            SyncError::Storage(err) => err.kind(),
            SyncError::Queue(err) => err.kind(),
            SyncError::Upstream(err) | SyncError::Published(err) => err.kind(),
            SyncError::Stage { kind, .. } => *kind,
            SyncError::Other(_) => ErrorKind::Storage,
        }
    }
}

/// Everything the run talks to outside its own database.
#[derive(Clone)]
pub struct Collaborators {
    pub upstream: Arc<dyn UpstreamCatalogProvider>,
    pub published: Arc<dyn PublishedCatalogProvider>,
    pub search: Arc<dyn WebResearchProvider>,
    pub synthesis: Arc<dyn SynthesisProvider>,
    pub content: Arc<dyn ContentGenerator>,
    pub images: Arc<dyn ImageProvider>,
    pub publisher: Arc<dyn Publisher>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub inter_artist_delay: Duration,
    /// Spacing between social-profile searches.
    pub search_delay: Duration,
    pub near_match_threshold: f64,
    pub lock_metadata: LockMetadata,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            inter_artist_delay: Duration::from_secs(5),
            search_delay: Duration::from_millis(1_500),
            near_match_threshold: DEFAULT_NEAR_MATCH_THRESHOLD,
            lock_metadata: LockMetadata::default(),
        }
    }
}

pub struct SyncStores {
    pub queue: ResearchQueue,
    pub lock: SyncLock,
    pub runs: RunStore,
    pub snapshots: SnapshotStore,
}

impl SyncStores {
    pub fn new(pool: SqlitePool, lock_max_age: Duration, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            queue: ResearchQueue::new(pool.clone()),
            lock: SyncLock::with_max_age(pool.clone(), lock_max_age),
            runs: RunStore::new(pool),
            snapshots: SnapshotStore::new(snapshot_dir),
        }
    }

    /// Last recorded run overlaid with the live lock: a held, non-stale
    /// lock reads as running.
    pub async fn status(&self) -> Result<StatusSnapshot, SyncError> {
        let mut sync = self.runs.latest().await?;
        let lock = self.lock.info().await?;
        if lock.as_ref().is_some_and(|info| !info.stale) {
            sync.status = RunStatus::Running;
        }
        let queue = self.queue.stats().await?;
        Ok(StatusSnapshot { sync, lock, queue })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub max_artists: Option<usize>,
    pub use_cached_snapshot: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueuePopulation {
    pub added: usize,
    pub total: usize,
    pub stats: QueueStats,
}

/// Last run plus what is happening right now.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    #[serde(flatten)]
    pub sync: SyncStatus,
    pub lock: Option<SyncLockInfo>,
    pub queue: QueueStats,
}

#[derive(Debug)]
struct StageFailure {
    stage: &'static str,
    kind: ErrorKind,
    message: String,
}

impl StageFailure {
    fn adapter(stage: &'static str, err: &AdapterError) -> Self {
        Self {
            stage,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    fn queue(err: QueueError) -> Self {
        Self {
            stage: "research",
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

enum ArtistOutcome {
    Published,
    AlreadyPublished,
}

/// Research text plus any social links the research turned up.
struct Researched {
    text: String,
    social_links: SocialLinks,
}

pub struct SyncOrchestrator {
    collaborators: Collaborators,
    stores: SyncStores,
    rules: CatalogRules,
    social: SocialLinkFinder,
    settings: OrchestratorSettings,
}

impl SyncOrchestrator {
    pub fn new(
        collaborators: Collaborators,
        stores: SyncStores,
        rules: CatalogRules,
        settings: OrchestratorSettings,
    ) -> Self {
        let social = SocialLinkFinder::new(collaborators.search.clone(), settings.search_delay);
        Self {
            collaborators,
            stores,
            rules,
            social,
            settings,
        }
    }

    pub fn stores(&self) -> &SyncStores {
        &self.stores
    }

    /// Runs one full sync under the lock. The lock is released and the run
    /// recorded on every path once it has been acquired.
    pub async fn run(&self, options: RunOptions) -> Result<SyncRunReport, SyncError> {
        if !self.stores.lock.acquire(&self.settings.lock_metadata).await? {
            let holder = self.stores.lock.info().await?.map(|info| info.owner_id);
            warn!(?holder, "sync requested while another run holds the lock");
            return Err(SyncError::Conflict { holder });
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut report = SyncRunReport {
            run_id,
            started_at,
            finished_at: started_at,
            success: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            duration_seconds: 0.0,
        };

        let outcome = self
            .run_locked(options, &mut report)
            .instrument(info_span!("sync_run", %run_id))
            .await;

        report.finished_at = Utc::now();
        report.duration_seconds =
            (report.finished_at - started_at).num_milliseconds() as f64 / 1000.0;

        let recorded = match &outcome {
            Ok(()) => {
                info!(
                    %run_id,
                    success = report.success.len(),
                    failed = report.failed.len(),
                    skipped = report.skipped.len(),
                    duration_seconds = report.duration_seconds,
                    "sync run completed"
                );
                self.stores.runs.record_completed(&report).await
            }
            Err(err) => {
                warn!(%run_id, error = %err, kind = %err.kind(), "sync run aborted");
                let partial = (report.attempted() > 0).then_some(&report);
                self.stores
                    .runs
                    .record_error(run_id, started_at, &err.to_string(), partial)
                    .await
            }
        };

        if let Err(err) = self.stores.lock.release().await {
            warn!(error = %err, "releasing the sync lock failed; it will expire on its own");
        }

        outcome?;
        recorded?;
        Ok(report)
    }

    async fn run_locked(
        &self,
        options: RunOptions,
        report: &mut SyncRunReport,
    ) -> Result<(), SyncError> {
        let diff = self
            .compute(options.max_artists, options.use_cached_snapshot)
            .await?;
        info!(
            upstream = diff.upstream_count,
            published = diff.published_count,
            missing = diff.missing.len(),
            "catalog diff computed"
        );

        for (position, candidate) in diff.missing.iter().enumerate() {
            if position > 0 && !self.settings.inter_artist_delay.is_zero() {
                tokio::time::sleep(self.settings.inter_artist_delay).await;
            }

            let span = info_span!(
                "artist",
                artist = %candidate.display_name,
                identity = %candidate.canonical_identity
            );
            match self.process_artist(candidate).instrument(span).await {
                Ok(ArtistOutcome::Published) => {
                    report.success.push(candidate.display_name.clone());
                }
                Ok(ArtistOutcome::AlreadyPublished) => {
                    report.skipped.push(candidate.display_name.clone());
                }
                Err(failure) if failure.kind == ErrorKind::DuplicateRace => {
                    report.skipped.push(candidate.display_name.clone());
                }
                Err(failure) => {
                    warn!(
                        artist = %candidate.display_name,
                        stage = failure.stage,
                        kind = %failure.kind,
                        error = %failure.message,
                        "artist failed"
                    );
                    report.failed.push(ArtistFailure {
                        name: candidate.display_name.clone(),
                        stage: failure.stage.to_string(),
                        kind: failure.kind,
                        error: failure.message.clone(),
                    });
                    if failure.kind.is_run_fatal() {
                        return Err(SyncError::Stage {
                            artist: candidate.display_name.clone(),
                            stage: failure.stage,
                            kind: failure.kind,
                            message: failure.message,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    async fn process_artist(
        &self,
        candidate: &ArtistCandidate,
    ) -> Result<ArtistOutcome, StageFailure> {
        let live = self
            .collaborators
            .published
            .fetch_published()
            .await
            .map_err(|err| StageFailure::adapter("recheck", &err))?;
        if PublishedIndex::build(&live).contains(candidate) {
            info!("already published; skipped");
            return Ok(ArtistOutcome::AlreadyPublished);
        }

        let researched = self.research(candidate).await?;
        let social_links = self
            .social
            .discover(&candidate.display_name, &researched.social_links)
            .await;

        let content = self
            .collaborators
            .content
            .generate(candidate, &researched.text)
            .await
            .map_err(|err| StageFailure::adapter("generate", &err))?;

        let media_id = self.image(candidate).await;

        let pages = self
            .collaborators
            .publisher
            .publish(candidate, &content, media_id, &social_links)
            .await
            .map_err(|err| StageFailure::adapter("publish", &err))?;
        info!(pages = ?pages, "artist published");
        Ok(ArtistOutcome::Published)
    }

    /// Cached result, else fresh research saved to the queue, else the
    /// degraded description. Only queue storage problems fail the stage.
    async fn research(&self, candidate: &ArtistCandidate) -> Result<Researched, StageFailure> {
        let queue = &self.stores.queue;
        let identity = candidate.canonical_identity.as_str();

        if let Some(cached) = queue.get_result(identity).await.map_err(StageFailure::queue)? {
            debug!("using cached research");
            return Ok(Researched {
                text: format_research(&cached),
                social_links: cached.social_links,
            });
        }

        // Only entries this run moved to processing are marked failed.
        let can_fail = match queue.entry(identity).await.map_err(StageFailure::queue)? {
            None => {
                queue.enqueue(candidate).await.map_err(StageFailure::queue)?;
                queue.mark_processing(identity).await.map_err(StageFailure::queue)?;
                true
            }
            Some(entry) => match entry.status {
                QueueStatus::Pending => {
                    queue.mark_processing(identity).await.map_err(StageFailure::queue)?;
                    true
                }
                QueueStatus::Processing | QueueStatus::Completed => false,
                QueueStatus::Failed => {
                    warn!(
                        error = entry.error.as_deref().unwrap_or(""),
                        "research previously failed; reset the queue entry to retry it"
                    );
                    return Ok(self.degraded(candidate));
                }
            },
        };

        match self.fresh_research(candidate).await {
            Ok(Some(result)) => {
                queue.save_result(&result).await.map_err(StageFailure::queue)?;
                Ok(Researched {
                    text: format_research(&result),
                    social_links: result.social_links,
                })
            }
            Ok(None) => {
                if can_fail {
                    queue
                        .mark_failed(identity, "no usable research found")
                        .await
                        .map_err(StageFailure::queue)?;
                }
                Ok(self.degraded(candidate))
            }
            Err(err) => {
                warn!(error = %err, kind = %err.kind(), "research failed; using catalog data only");
                if can_fail {
                    queue
                        .mark_failed(identity, &err.to_string())
                        .await
                        .map_err(StageFailure::queue)?;
                }
                Ok(self.degraded(candidate))
            }
        }
    }

    /// Runs the research queries and synthesizes whatever came back. A
    /// query that errors is skipped unless every query errors.
    async fn fresh_research(
        &self,
        candidate: &ArtistCandidate,
    ) -> Result<Option<ResearchResult>, AdapterError> {
        let mut hits: Vec<SearchHit> = Vec::new();
        let mut last_error = None;
        let mut succeeded = 0usize;
        for query in research_queries(candidate) {
            match self.collaborators.search.search(&query, HITS_PER_QUERY).await {
                Ok(found) => {
                    succeeded += 1;
                    for hit in found {
                        if !hits.iter().any(|h| h.url == hit.url) {
                            hits.push(hit);
                        }
                    }
                }
                Err(err) => {
                    debug!(%query, error = %err, "research query failed");
                    last_error = Some(err);
                }
            }
        }
        if succeeded == 0 {
            if let Some(err) = last_error {
                return Err(err);
            }
        }
        if hits.is_empty() {
            return Ok(None);
        }
        self.collaborators.synthesis.synthesize(candidate, &hits).await
    }

    fn degraded(&self, candidate: &ArtistCandidate) -> Researched {
        Researched {
            text: degraded_description(candidate),
            social_links: SocialLinks::default(),
        }
    }

    async fn image(&self, candidate: &ArtistCandidate) -> Option<MediaId> {
        let images = &self.collaborators.images;
        if let Some(image_ref) = &candidate.image_ref {
            match images.transfer(image_ref, &candidate.display_name).await {
                Ok(Some(id)) => return Some(id),
                Ok(None) => debug!("image transfer returned no media id"),
                Err(err) => warn!(error = %err, "image transfer failed"),
            }
        }
        match images.find_existing(&candidate.display_name).await {
            Ok(found) => found,
            Err(err) => {
                warn!(error = %err, "media library lookup failed; publishing without image");
                None
            }
        }
    }

    /// Upstream candidates after catalog rules, from the snapshot cache
    /// when asked and available.
    async fn candidates(&self, use_cached_snapshot: bool) -> Result<Vec<ArtistCandidate>, SyncError> {
        let upstream = &self.collaborators.upstream;
        let source_id = upstream.provider_id().to_string();

        let cached = if use_cached_snapshot {
            self.stores.snapshots.latest(&source_id).await?
        } else {
            None
        };
        let candidates = match cached {
            Some(snapshot) => {
                info!(
                    source = %source_id,
                    fetched_at = %snapshot.fetched_at,
                    count = snapshot.candidates.len(),
                    "using cached upstream snapshot"
                );
                snapshot.candidates
            }
            None => {
                let fetched = upstream
                    .fetch_candidates()
                    .instrument(info_span!("upstream_fetch", source = %source_id))
                    .await
                    .map_err(SyncError::Upstream)?;
                if let Err(err) = self.stores.snapshots.store(&source_id, Utc::now(), &fetched).await {
                    warn!(error = %err, "storing upstream snapshot failed");
                }
                fetched
            }
        };

        let (kept, outcome) = self.rules.apply(candidates);
        if outcome.excluded > 0 || outcome.duplicates > 0 || !outcome.unresolvable.is_empty() {
            info!(
                excluded = outcome.excluded,
                duplicates = outcome.duplicates,
                unresolvable = outcome.unresolvable.len(),
                "catalog rules applied"
            );
        }
        Ok(kept)
    }

    async fn published(&self) -> Result<Vec<PublishedArtist>, SyncError> {
        self.collaborators
            .published
            .fetch_published()
            .instrument(info_span!("published_fetch"))
            .await
            .map_err(SyncError::Published)
    }

    async fn compute(
        &self,
        max_artists: Option<usize>,
        use_cached_snapshot: bool,
    ) -> Result<CatalogDiff, SyncError> {
        let candidates = self.candidates(use_cached_snapshot).await?;
        let published = self.published().await?;
        let diff = compute_diff(
            &candidates,
            &published,
            max_artists,
            self.settings.near_match_threshold,
        );
        for near in &diff.near_matches {
            warn!(
                candidate = %near.candidate,
                published = %near.published,
                score = near.score,
                "near match needs review"
            );
        }
        Ok(diff)
    }

    /// The diff alone, without taking the lock.
    pub async fn diff(&self, use_cached_snapshot: bool) -> Result<CatalogDiff, SyncError> {
        self.compute(None, use_cached_snapshot).await
    }

    /// Enqueues every missing artist for research without publishing.
    pub async fn populate_queue_only(&self) -> Result<QueuePopulation, SyncError> {
        let diff = self.compute(None, false).await?;
        let added = self.stores.queue.enqueue_many(&diff.missing).await?;
        let stats = self.stores.queue.stats().await?;
        info!(added, missing = diff.missing.len(), "research queue populated");
        Ok(QueuePopulation {
            added,
            total: diff.missing.len(),
            stats,
        })
    }

    pub async fn status(&self) -> Result<StatusSnapshot, SyncError> {
        self.stores.status().await
    }

    pub async fn audit_published(&self) -> Result<Vec<DuplicateGroup>, SyncError> {
        let published = self.published().await?;
        Ok(audit_duplicates(&published))
    }

    pub async fn force_release(&self) -> Result<bool, SyncError> {
        Ok(self.stores.lock.force_release().await?)
    }
}
