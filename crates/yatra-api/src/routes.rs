use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use yatra_core::db::{CanonicalStore, Database, SqliteStore};
use yatra_core::models::{
    Checkpoint, Participant, ScanCursor, ScanLogPage, ScanSubmission, SubmitReceipt,
};
use yatra_core::progress::Projection;
use yatra_core::roster::{import_roster, ImportSummary, RosterFile};
use yatra_core::services::{IngestionService, RosterQuery};

use crate::auth::{device_key_matches, extract_bearer_token};
use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    store: Arc<dyn CanonicalStore>,
    ingest: IngestionService,
    query: RosterQuery,
}

impl AppState {
    /// Open the configured database and apply the startup roster, if any
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, yatra_core::Error> {
        let database = Database::open_path_or_memory(&config.database_path)?;
        let state = Self::with_store(config, Arc::new(SqliteStore::new(database)));

        if let Some(path) = state.config.roster_path.as_deref() {
            let roster = RosterFile::from_json_file(path)?;
            let summary = import_roster(state.store.as_ref(), &roster)?;
            tracing::info!(
                path = %path.display(),
                participants = summary.participants,
                checkpoints = summary.checkpoints,
                "Loaded startup roster"
            );
        }
        Ok(state)
    }

    pub fn with_store(config: Arc<AppConfig>, store: Arc<dyn CanonicalStore>) -> Self {
        Self {
            ingest: IngestionService::new(Arc::clone(&store)),
            query: RosterQuery::with_max_page_size(Arc::clone(&store), config.max_page_size),
            store,
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/scans", post(submit_scan).get(list_scans))
        .route("/participants", get(list_participants))
        .route("/checkpoints", get(list_checkpoints))
        .route("/progress", get(progress))
        .route("/roster", post(upload_roster))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_device_key,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

/// Run a store call off the async workers
async fn blocking<T, F>(work: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> yatra_core::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| AppError::internal(format!("store task failed: {error}")))?
        .map_err(AppError::from)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    scans: usize,
}

async fn healthz(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let store = Arc::clone(&state.store);
    let scans = blocking(move || store.scan_count()).await?;
    Ok(Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        scans,
    }))
}

async fn require_device_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = state.config.device_api_key.as_deref() {
        let presented = extract_bearer_token(request.headers())?;
        if !device_key_matches(expected, presented) {
            return Err(AppError::unauthorized("Device key not recognized"));
        }
    }
    Ok(next.run(request).await)
}

async fn submit_scan(
    State(state): State<AppState>,
    Json(submission): Json<ScanSubmission>,
) -> Result<Json<SubmitReceipt>, AppError> {
    let ingest = state.ingest.clone();
    let receipt = blocking(move || ingest.submit_scan(submission)).await?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
struct ScanLogQuery {
    since: Option<ScanCursor>,
    limit: Option<usize>,
}

async fn list_scans(
    State(state): State<AppState>,
    Query(query): Query<ScanLogQuery>,
) -> Result<Json<ScanLogPage>, AppError> {
    let roster_query = state.query.clone();
    let page =
        blocking(move || roster_query.list_scan_logs(query.since, query.limit)).await?;
    Ok(Json(page))
}

async fn list_participants(
    State(state): State<AppState>,
) -> Result<Json<Vec<Participant>>, AppError> {
    let query = state.query.clone();
    Ok(Json(blocking(move || query.list_participants()).await?))
}

async fn list_checkpoints(
    State(state): State<AppState>,
) -> Result<Json<Vec<Checkpoint>>, AppError> {
    let query = state.query.clone();
    Ok(Json(blocking(move || query.list_checkpoints()).await?))
}

async fn progress(State(state): State<AppState>) -> Result<Json<Projection>, AppError> {
    let query = state.query.clone();
    Ok(Json(blocking(move || query.progress()).await?))
}

async fn upload_roster(
    State(state): State<AppState>,
    Json(roster): Json<RosterFile>,
) -> Result<Json<ImportSummary>, AppError> {
    let store = Arc::clone(&state.store);
    let summary = blocking(move || import_roster(store.as_ref(), &roster)).await?;
    Ok(Json(summary))
}
