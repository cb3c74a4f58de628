//! Boundary error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use redraft_core::PipelineError;
use redraft_ingestion::IngestionError;
use tracing::{debug, error};

/// A [`PipelineError`] on its way out of the HTTP layer
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl From<IngestionError> for ApiError {
    fn from(err: IngestionError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(status = status.as_u16(), code = self.0.code(), error = %self.0, "Request failed");
        } else {
            debug!(status = status.as_u16(), code = self.0.code(), error = %self.0, "Request rejected");
        }

        (status, Json(self.0.to_payload())).into_response()
    }
}
