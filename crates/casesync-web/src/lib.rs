//! JSON HTTP surface: webhook intake plus process management and manual sync.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use casesync_core::NewTrackedProcess;
use casesync_sync::{
    maybe_build_scheduler, pipeline_from_config, PipelineError, SyncConfig, SyncOptions,
    SyncPipeline, SyncTrigger, WebhookPayload,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "casesync-web";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SyncPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<SyncPipeline>) -> Self {
        Self { pipeline }
    }
}

/// Maps pipeline failures onto status codes with a `{"error": ...}` body.
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Provider { .. } | PipelineError::Upstream(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "request rejected");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct ImportBody {
    tenant_id: Uuid,
    case_number: String,
    #[serde(default)]
    tracking_id: Option<String>,
    #[serde(default)]
    monitoring_enabled: bool,
}

#[derive(Debug, Deserialize, Default)]
struct SyncQuery {
    #[serde(default)]
    force_new: bool,
}

#[derive(Debug, Deserialize)]
struct MonitoringBody {
    enabled: bool,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/webhooks/judit", post(webhook_handler))
        .route("/processes", post(import_handler))
        .route("/processes/{id}/sync", post(sync_handler))
        .route("/processes/{id}/monitoring", put(monitoring_handler))
        .route("/processes/{id}/archive", post(archive_handler))
        .route("/processes/{id}/movements", get(movements_handler))
        .route("/processes/{id}/movements/read", post(mark_read_handler))
        .route("/processes/{id}/tracking", get(tracking_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Builds the pipeline from the environment, starts the monitoring scheduler when
/// enabled, and serves until the listener fails.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let pipeline = Arc::new(pipeline_from_config(&config).await?);

    let scheduler = maybe_build_scheduler(&config, pipeline.clone()).await?;
    if let Some(sched) = &scheduler {
        sched.start().await?;
        info!(cron = %config.sync_cron, "monitoring scheduler started");
    }

    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, "listening");
    axum::serve(listener, app(AppState::new(pipeline))).await?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebhookPayload>,
) -> ApiResult<Response> {
    let receipt = state.pipeline.receive_webhook(payload).await?;
    Ok(Json(receipt).into_response())
}

async fn import_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ImportBody>,
) -> ApiResult<Response> {
    let process = state
        .pipeline
        .import_process(NewTrackedProcess {
            tenant_id: body.tenant_id,
            case_number: body.case_number,
            tracking_id: body.tracking_id,
            monitoring_enabled: body.monitoring_enabled,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(process)).into_response())
}

async fn sync_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<SyncQuery>,
) -> ApiResult<Response> {
    let outcome = state
        .pipeline
        .sync_process(
            id,
            SyncOptions {
                trigger: SyncTrigger::Manual,
                force_new_request: query.force_new,
            },
        )
        .await?;
    Ok(Json(outcome).into_response())
}

async fn monitoring_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<MonitoringBody>,
) -> ApiResult<StatusCode> {
    state.pipeline.set_monitoring(id, body.enabled).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn archive_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.pipeline.archive_process(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn movements_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let movements = state.pipeline.list_movements(id).await?;
    Ok(Json(movements).into_response())
}

async fn mark_read_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let marked = state.pipeline.mark_read(id).await?;
    Ok(Json(json!({ "marked": marked })).into_response())
}

async fn tracking_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let record = state.pipeline.tracking_status(id).await?;
    Ok(Json(record).into_response())
}
