//! JSON status and control surface for the roster sync.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use roster_core::{ErrorKind, QueueEntry};
use roster_storage::QueueStats;
use roster_sync::{
    build_orchestrator, maybe_build_scheduler, RunOptions, SyncConfig, SyncError, SyncOrchestrator,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "roster-web";

/// Either a ready orchestrator or the reason there is none. Every route
/// answers 503 in the second case.
#[derive(Clone)]
pub struct AppState {
    sync: Result<Arc<SyncOrchestrator>, String>,
}

impl AppState {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            sync: Ok(orchestrator),
        }
    }

    pub fn unconfigured(reason: impl Into<String>) -> Self {
        Self {
            sync: Err(reason.into()),
        }
    }

    fn orchestrator(&self) -> Result<&Arc<SyncOrchestrator>, Response> {
        self.sync.as_ref().map_err(|reason| {
            error_response(StatusCode::SERVICE_UNAVAILABLE, ErrorKind::Configuration, reason)
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct MissingParams {
    #[serde(default)]
    use_cache: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SyncParams {
    max_artists: Option<usize>,
    #[serde(default)]
    use_cache: bool,
}

#[derive(Debug, Serialize)]
struct ResearchStatus {
    stats: QueueStats,
    failed: Vec<QueueEntry>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/missing", get(missing_handler))
        .route("/research-status", get(research_status_handler))
        .route("/sync", post(sync_handler))
        .route("/prepare-research", post(prepare_research_handler))
        .route("/lock/force-release", post(force_release_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("ROSTER_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let config = SyncConfig::from_env();
    let mut scheduler = None;
    let state = match build_orchestrator(&config).await {
        Ok(orchestrator) => {
            let orchestrator = Arc::new(orchestrator);
            scheduler = maybe_build_scheduler(&config, orchestrator.clone()).await?;
            AppState::new(orchestrator)
        }
        Err(err) if err.kind() == ErrorKind::Configuration => {
            warn!(error = %err, "serving without a sync pipeline");
            AppState::unconfigured(err.to_string())
        }
        Err(err) => return Err(err.into()),
    };
    if let Some(sched) = &scheduler {
        sched.start().await?;
    }

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "roster web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    let orchestrator = match state.orchestrator() {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    match orchestrator.status().await {
        Ok(status) => Json(status).into_response(),
        Err(err) => sync_error(err),
    }
}

async fn missing_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MissingParams>,
) -> Response {
    let orchestrator = match state.orchestrator() {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    match orchestrator.diff(params.use_cache).await {
        Ok(diff) => Json(diff).into_response(),
        Err(err) => sync_error(err),
    }
}

async fn research_status_handler(State(state): State<Arc<AppState>>) -> Response {
    let orchestrator = match state.orchestrator() {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    let queue = &orchestrator.stores().queue;
    let status = async {
        Ok::<_, SyncError>(ResearchStatus {
            stats: queue.stats().await?,
            failed: queue.list_failed().await?,
        })
    };
    match status.await {
        Ok(status) => Json(status).into_response(),
        Err(err) => sync_error(err),
    }
}

/// Starts a run in the background. A held lock answers 409 right away; a
/// run that loses the race afterwards only logs.
async fn sync_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SyncParams>,
) -> Response {
    let orchestrator = match state.orchestrator() {
        Ok(o) => o.clone(),
        Err(resp) => return resp,
    };
    match orchestrator.stores().lock.is_locked().await {
        Ok(true) => {
            return sync_error(SyncError::Conflict {
                holder: orchestrator
                    .stores()
                    .lock
                    .info()
                    .await
                    .ok()
                    .flatten()
                    .map(|info| info.owner_id),
            })
        }
        Ok(false) => {}
        Err(err) => return sync_error(err.into()),
    }

    let options = RunOptions {
        max_artists: params.max_artists,
        use_cached_snapshot: params.use_cache,
    };
    tokio::spawn(async move {
        match orchestrator.run(options).await {
            Ok(report) => info!(run_id = %report.run_id, "sync triggered over http finished"),
            Err(err) => warn!(error = %err, kind = %err.kind(), "sync triggered over http failed"),
        }
    });
    (StatusCode::ACCEPTED, Json(json!({ "status": "started" }))).into_response()
}

async fn prepare_research_handler(State(state): State<Arc<AppState>>) -> Response {
    let orchestrator = match state.orchestrator() {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    match orchestrator.populate_queue_only().await {
        Ok(population) => Json(population).into_response(),
        Err(err) => sync_error(err),
    }
}

async fn force_release_handler(State(state): State<Arc<AppState>>) -> Response {
    let orchestrator = match state.orchestrator() {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    match orchestrator.force_release().await {
        Ok(released) => Json(json!({ "released": released })).into_response(),
        Err(err) => sync_error(err),
    }
}

fn error_response(status: StatusCode, kind: ErrorKind, message: &str) -> Response {
    (status, Json(json!({ "error": message, "kind": kind }))).into_response()
}

fn sync_error(err: SyncError) -> Response {
    let status = match (&err, err.kind()) {
        (_, ErrorKind::Conflict) => StatusCode::CONFLICT,
        (_, ErrorKind::Configuration) => StatusCode::SERVICE_UNAVAILABLE,
        (SyncError::Upstream(_) | SyncError::Published(_), _) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.kind(), &err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use roster_adapters::{
        AdapterError, ContentGenerator, ImageProvider, JsonFileCatalog, JsonFilePublished,
        Publisher, SearchHit, SynthesisProvider, WebResearchProvider,
    };
    use roster_core::{
        ArtistCandidate, BilingualContent, Locale, MediaId, PageRef, ResearchResult, SocialLinks,
    };
    use roster_storage::{LockMetadata, SyncLock, DEFAULT_LOCK_MAX_AGE};
    use roster_sync::{no_delay_settings, CatalogRules, Collaborators, SyncStores};
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Stands in for every collaborator a request never reaches.
    struct Offline;

    fn offline() -> AdapterError {
        AdapterError::NotConfigured {
            provider: "offline",
            detail: "not used in these tests".into(),
        }
    }

    #[async_trait]
    impl WebResearchProvider for Offline {
        async fn search(&self, _query: &str, _max: usize) -> Result<Vec<SearchHit>, AdapterError> {
            Err(offline())
        }
    }

    #[async_trait]
    impl SynthesisProvider for Offline {
        async fn synthesize(
            &self,
            _candidate: &ArtistCandidate,
            _hits: &[SearchHit],
        ) -> Result<Option<ResearchResult>, AdapterError> {
            Err(offline())
        }
    }

    #[async_trait]
    impl ContentGenerator for Offline {
        async fn generate(
            &self,
            _candidate: &ArtistCandidate,
            _research_text: &str,
        ) -> Result<BilingualContent, AdapterError> {
            Err(offline())
        }
    }

    #[async_trait]
    impl ImageProvider for Offline {
        async fn transfer(&self, _image_ref: &str, _name: &str) -> Result<Option<MediaId>, AdapterError> {
            Ok(None)
        }

        async fn find_existing(&self, _name: &str) -> Result<Option<MediaId>, AdapterError> {
            Ok(None)
        }
    }

    #[async_trait]
    impl Publisher for Offline {
        async fn publish(
            &self,
            _candidate: &ArtistCandidate,
            _content: &BilingualContent,
            _media_id: Option<MediaId>,
            _social_links: &SocialLinks,
        ) -> Result<BTreeMap<Locale, PageRef>, AdapterError> {
            Err(offline())
        }
    }

    async fn fixture_app() -> (TempDir, Arc<SyncOrchestrator>, Router) {
        let dir = tempfile::tempdir().expect("tempdir");
        let upstream = dir.path().join("upstream.json");
        let published = dir.path().join("published.json");
        std::fs::write(
            &upstream,
            r#"[
                {"source_id": "1", "display_name": "Röyksopp", "genres": ["electronic"]},
                {"source_id": "2", "display_name": "Bicep"},
                {"source_id": "3", "display_name": "Café Tacvba"}
            ]"#,
        )
        .unwrap();
        std::fs::write(
            &published,
            r#"[{"id": 5, "name": "Royksopp", "locale": "fr"}]"#,
        )
        .unwrap();

        let url = format!("sqlite://{}", dir.path().join("roster.db").display());
        let pool = roster_storage::open(&url).await.expect("open database");
        let offline = Arc::new(Offline);
        let collaborators = Collaborators {
            upstream: Arc::new(JsonFileCatalog::new("fixture", upstream)),
            published: Arc::new(JsonFilePublished::new(published)),
            search: offline.clone(),
            synthesis: offline.clone(),
            content: offline.clone(),
            images: offline.clone(),
            publisher: offline,
        };
        let stores = SyncStores::new(pool, DEFAULT_LOCK_MAX_AGE, dir.path().join("snapshots"));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            collaborators,
            stores,
            CatalogRules::default(),
            no_delay_settings("web-test"),
        ));
        let router = app(AppState::new(orchestrator.clone()));
        (dir, orchestrator, router)
    }

    async fn call(router: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let resp = router
            .oneshot(
                axum::http::Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn unconfigured_service_answers_503() {
        let router = app(AppState::unconfigured("missing ANTHROPIC_API_KEY"));
        let (status, body) = call(router.clone(), "GET", "/status").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["kind"], "configuration");
        assert!(body["error"].as_str().unwrap().contains("ANTHROPIC_API_KEY"));

        let (status, _) = call(router, "POST", "/sync").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn status_starts_as_never_run() {
        let (_dir, _orchestrator, router) = fixture_app().await;
        let (status, body) = call(router, "GET", "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "never_run");
        assert!(body["lock"].is_null());
        assert_eq!(body["queue"]["total"], 0);
    }

    #[tokio::test]
    async fn missing_lists_unpublished_artists_in_upstream_order() {
        let (_dir, _orchestrator, router) = fixture_app().await;
        let (status, body) = call(router, "GET", "/missing").await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body["missing"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["display_name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Bicep", "Café Tacvba"]);
        assert_eq!(body["upstream_count"], 3);
    }

    #[tokio::test]
    async fn prepare_research_fills_the_queue() {
        let (_dir, _orchestrator, router) = fixture_app().await;
        let (status, body) = call(router.clone(), "POST", "/prepare-research").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["added"], 2);

        let (status, body) = call(router, "GET", "/research-status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["pending"], 2);
        assert_eq!(body["failed"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn sync_while_locked_is_409_until_force_released() {
        let (dir, _orchestrator, router) = fixture_app().await;
        let url = format!("sqlite://{}", dir.path().join("roster.db").display());
        let other = SyncLock::new(roster_storage::open(&url).await.unwrap());
        assert!(other.acquire(&LockMetadata::new("cron-host")).await.unwrap());

        let (status, body) = call(router.clone(), "POST", "/sync").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "conflict");

        let (status, body) = call(router.clone(), "GET", "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["lock"]["owner_id"], "cron-host");

        let (status, body) = call(router.clone(), "POST", "/lock/force-release").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["released"], true);

        let (_, body) = call(router, "GET", "/status").await;
        assert!(body["lock"].is_null());
    }
}
