use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::activity::QuarantineEntry;
use crate::engine::{BatchReport, DuplicateStatistics, Engine, IngestOutcome, SweepReport};
use crate::error::{EngineError, StoreError};
use crate::ingest::types::RawSubmission;
use crate::lifecycle::{CleanupReport, SourceCleanupReport};
use crate::metrics::Metrics;
use crate::model::{CanonicalEvent, EventFilter};
use crate::monitor::{HealthReport, WeeklyReport};
use crate::notify::NotifierMux;
use crate::retention::RetentionPolicy;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub notifier: Arc<NotifierMux>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, notifier: Arc<NotifierMux>) -> Self {
        Self { engine, notifier }
    }
}

pub fn router(state: AppState) -> Router {
    routes().with_state(state)
}

/// Same as [`router`] plus the Prometheus `/metrics` endpoint.
pub fn router_with_metrics(state: AppState, metrics: &Metrics) -> Router {
    routes().merge(metrics.router()).with_state(state)
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/events", post(ingest_one).get(list_events))
        .route("/events/batch", post(ingest_batch))
        .route("/lifecycle/cleanup", post(run_cleanup))
        .route("/lifecycle/cleanup/source/{source}", post(run_source_cleanup))
        .route("/lifecycle/dedup-sweep", post(dedup_sweep))
        .route("/lifecycle/duplicate-stats", get(duplicate_stats))
        .route("/lifecycle/health", get(health))
        .route("/lifecycle/weekly-report", get(weekly_report))
        .route("/lifecycle/policies", get(policies))
        .route("/lifecycle/quarantine", get(quarantine))
        .route("/admin/retention-policy", put(replace_policy))
        .route("/admin/reload-retention-policy", post(reload_policy))
        .layer(CorsLayer::very_permissive())
}

/// JSON `{"error": ...}` with a status derived from the engine error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(e: anyhow::Error) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: format!("{e:#}"),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::IngestionParse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::MergeConflict { .. } => StatusCode::CONFLICT,
            EngineError::StoreTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            EngineError::Store(StoreError::Conflict { .. } | StoreError::AliasClaimed { .. }) => {
                StatusCode::CONFLICT
            }
            EngineError::Store(StoreError::Unavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(target: "api", status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn ingest_one(
    State(state): State<AppState>,
    Json(raw): Json<RawSubmission>,
) -> ApiResult<(StatusCode, Json<IngestOutcome>)> {
    let out = state.engine.ingest(&raw).await?;
    let status = if out.merged {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(out)))
}

async fn ingest_batch(
    State(state): State<AppState>,
    Json(raws): Json<Vec<RawSubmission>>,
) -> Json<BatchReport> {
    Json(state.engine.ingest_batch(raws).await)
}

async fn list_events(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> ApiResult<Json<Vec<CanonicalEvent>>> {
    Ok(Json(state.engine.get_active_events(&filter).await?))
}

async fn run_cleanup(State(state): State<AppState>) -> ApiResult<Json<CleanupReport>> {
    Ok(Json(state.engine.run_cleanup().await?))
}

async fn run_source_cleanup(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> ApiResult<Json<SourceCleanupReport>> {
    Ok(Json(state.engine.run_source_cleanup(&source).await?))
}

#[derive(Debug, Default, Deserialize)]
struct SweepQuery {
    #[serde(default)]
    dry_run: bool,
}

async fn dedup_sweep(
    State(state): State<AppState>,
    Query(q): Query<SweepQuery>,
) -> ApiResult<Json<SweepReport>> {
    Ok(Json(state.engine.sweep_duplicates(q.dry_run).await?))
}

async fn duplicate_stats(State(state): State<AppState>) -> ApiResult<Json<DuplicateStatistics>> {
    Ok(Json(state.engine.duplicate_statistics().await?))
}

async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthReport>> {
    let report = state.engine.run_health_check().await?;
    state.notifier.alert_on_health(&report).await;
    Ok(Json(report))
}

#[derive(Debug, Default, Deserialize)]
struct WeeklyQuery {
    #[serde(default)]
    deliver: bool,
}

async fn weekly_report(
    State(state): State<AppState>,
    Query(q): Query<WeeklyQuery>,
) -> ApiResult<Json<WeeklyReport>> {
    let report = state.engine.run_weekly_report().await?;
    if q.deliver {
        let delivered = state.notifier.deliver_weekly(&report).await;
        tracing::info!(target: "api", delivered, "weekly report delivered");
    }
    Ok(Json(report))
}

async fn policies(State(state): State<AppState>) -> Json<RetentionPolicy> {
    Json(state.engine.policy())
}

#[derive(Debug, Deserialize)]
struct QuarantineQuery {
    #[serde(default = "default_quarantine_limit")]
    limit: usize,
}

fn default_quarantine_limit() -> usize {
    50
}

async fn quarantine(
    State(state): State<AppState>,
    Query(q): Query<QuarantineQuery>,
) -> Json<Vec<QuarantineEntry>> {
    Json(state.engine.activity().quarantined_last_n(q.limit))
}

async fn replace_policy(
    State(state): State<AppState>,
    Json(policy): Json<RetentionPolicy>,
) -> ApiResult<Json<RetentionPolicy>> {
    let reapplied = state
        .engine
        .set_policy(policy)
        .await
        .map_err(ApiError::bad_request)?;
    tracing::info!(target: "api", escalated = reapplied.escalated, "retention policy replaced");
    Ok(Json(state.engine.policy()))
}

async fn reload_policy(State(state): State<AppState>) -> ApiResult<Json<RetentionPolicy>> {
    state
        .engine
        .reload_policy()
        .await
        .map_err(ApiError::bad_request)
        .map(Json)
}
