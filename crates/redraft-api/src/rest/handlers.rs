//! Route handlers

use std::sync::Arc;

use axum::{
    extract::{multipart::Field, multipart::MultipartRejection, Multipart, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use redraft_core::{OptimizeOutput, PipelineError};
use redraft_infra::{
    render_prometheus, BulkheadSnapshot, CircuitSnapshot, ComponentHealth, HealthStatus,
    MetricsSnapshot,
};
use redraft_ingestion::{ArtifactGuard, ByteStream, StoreError};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{ApiError, AppState};

/// Multipart field the upload is expected under
pub const FILE_FIELD: &str = "file";

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "redraft",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// `POST /api/v1/optimize`
///
/// Accepts one file per request: the `file` field, or else the first field
/// carrying a filename. Any other fields are ignored.
pub async fn optimize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<OptimizeOutput>, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    state.validator.validate_content_type(content_type)?;

    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    state.validator.check_declared_length(content_length)?;

    let mut multipart = multipart
        .map_err(|rejection| PipelineError::InvalidContentType(rejection.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| PipelineError::StreamError(err.body_text()))?
    {
        if !is_file_field(&field) {
            debug!(field = field.name().unwrap_or_default(), "Skipping non-file field");
            continue;
        }

        let filename = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .ok_or(PipelineError::NoFile)?;
        let declared_mime = field.content_type().map(str::to_owned);

        let data: ByteStream<'_> =
            Box::pin(field.map_err(|err| StoreError::Stream(err.body_text())));
        let artifact = state
            .validator
            .accept(&filename, declared_mime.as_deref(), data, None)
            .await?;

        let output = run_job(&state, artifact).await?;
        return Ok(Json(output));
    }

    Err(PipelineError::NoFile.into())
}

fn is_file_field(field: &Field<'_>) -> bool {
    field.name() == Some(FILE_FIELD) || field.file_name().is_some()
}

/// Run the pipeline under a request-scoped cancellation token.
///
/// The token fires when the request future is dropped (client disconnect)
/// or when the request timeout elapses.
async fn run_job(state: &AppState, artifact: ArtifactGuard) -> Result<OptimizeOutput, PipelineError> {
    let cancel = CancellationToken::new();
    let _disconnect = cancel.clone().drop_guard();

    let job = state.pipeline.optimize(artifact, &cancel);
    tokio::pin!(job);

    tokio::select! {
        result = &mut job => result,
        _ = tokio::time::sleep(state.request_timeout) => {
            warn!(
                timeout_secs = state.request_timeout.as_secs(),
                "Request timed out, cancelling job"
            );
            cancel.cancel();
            job.await
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobCounters {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub active: u64,
}

impl From<&MetricsSnapshot> for JobCounters {
    fn from(snapshot: &MetricsSnapshot) -> Self {
        Self {
            started: snapshot.jobs_started,
            succeeded: snapshot.jobs_succeeded,
            failed: snapshot.jobs_failed,
            cancelled: snapshot.jobs_cancelled,
            active: snapshot.active_jobs,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: &'static str,
    pub circuit: CircuitSnapshot,
    pub queue: BulkheadSnapshot,
    pub jobs: JobCounters,
    pub components: Vec<ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}

/// `GET /health`: 503 only when the service is unavailable
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let report = state.health.current().await;
    let metrics = state.metrics().snapshot();

    let status = if report.status.is_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let body = HealthResponse {
        status: report.status,
        version: env!("CARGO_PKG_VERSION"),
        circuit: state.breaker().snapshot().await,
        queue: state.bulkhead().snapshot(),
        jobs: JobCounters::from(&metrics),
        components: report.components,
        checked_at: report.checked_at,
    };

    (status, Json(body))
}

/// `GET /metrics`
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics().snapshot())
}

/// `GET /metrics/prometheus`
pub async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = render_prometheus(
        &state.metrics_prefix,
        &state.metrics().snapshot(),
        &state.breaker().snapshot().await,
        &state.bulkhead().snapshot(),
    );

    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body)
}
