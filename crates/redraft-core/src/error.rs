//! Error taxonomy for the optimization pipeline.
//!
//! Every internal failure is normalized into [`PipelineError`] before it
//! leaves the pipeline. Transport failures are classified once, at the
//! network wrapper, into the closed [`InferenceErrorKind`] enumeration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed classification of a failed inference call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceErrorKind {
    /// The call did not complete within its time budget
    Timeout,
    /// The endpoint refused, reset or dropped the connection
    ConnectionRefused,
    /// The endpoint answered with a 5xx status
    ServerUnavailable,
    /// The requested model is not present on the endpoint
    ModelNotFound,
    /// The endpoint answered with a body that could not be used
    MalformedResponse,
    /// The endpoint rejected the request itself (4xx other than 404)
    RequestRejected,
}

impl InferenceErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionRefused | Self::ServerUnavailable
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionRefused => "connection_refused",
            Self::ServerUnavailable => "server_unavailable",
            Self::ModelNotFound => "model_not_found",
            Self::MalformedResponse => "malformed_response",
            Self::RequestRejected => "request_rejected",
        }
    }
}

impl std::fmt::Display for InferenceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure of one inference call
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct InferenceError {
    pub kind: InferenceErrorKind,
    pub message: String,
}

impl InferenceError {
    pub fn new(kind: InferenceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::Timeout, message)
    }

    pub fn connection_refused(message: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::ConnectionRefused, message)
    }

    pub fn model_not_found(message: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::ModelNotFound, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(InferenceErrorKind::MalformedResponse, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Why the inference service could not produce a chunk output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceFailureReason {
    /// A retryable error persisted through every allowed attempt
    ConnectionError { last: InferenceErrorKind },
    /// A non-retryable error ended the call after one attempt
    Fatal { kind: InferenceErrorKind },
    /// The circuit breaker rejected the call without touching the network
    CircuitOpen,
    /// No inference slot became available within the wait bound
    QueueFull,
}

impl ServiceFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionError { .. } => "connection_error",
            Self::Fatal { kind } => kind.as_str(),
            Self::CircuitOpen => "circuit_open",
            Self::QueueFull => "queue_full",
        }
    }
}

/// Terminal failure of the resilient invoker for one chunk
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message} (chunk {chunk_ordinal}, {attempts} attempt(s), {elapsed_ms} ms)")]
pub struct ServiceFailure {
    pub reason: ServiceFailureReason,
    pub message: String,
    pub chunk_ordinal: usize,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// Status class an error is surfaced under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    BadInput,
    UnprocessableContent,
    TemporarilyUnavailable,
    Internal,
}

/// Pipeline stage an error originated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Validation,
    Extraction,
    Chunking,
    Inference,
    Storage,
}

/// The single error type that crosses the pipeline boundary
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Invalid file type: {0}")]
    InvalidFileType(String),

    #[error("No file was provided")]
    NoFile,

    #[error("Upload stream error: {0}")]
    StreamError(String),

    #[error("Incomplete upload: expected {expected} bytes, received {received}")]
    IncompleteUpload { expected: u64, received: u64 },

    #[error("Text extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Document contains no text")]
    EmptyContent,

    #[error("Inference service unavailable: {0}")]
    ServiceUnavailable(ServiceFailure),

    #[error("Job cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32, elapsed_ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidContentType(_)
            | Self::FileTooLarge { .. }
            | Self::InvalidFileType(_)
            | Self::NoFile
            | Self::StreamError(_)
            | Self::IncompleteUpload { .. } => ErrorCategory::BadInput,
            Self::ExtractionFailed(_) | Self::EmptyContent => ErrorCategory::UnprocessableContent,
            Self::ServiceUnavailable(_) | Self::Cancelled { .. } => {
                ErrorCategory::TemporarilyUnavailable
            }
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// HTTP status code within the category's status class
    pub fn status_code(&self) -> u16 {
        match self {
            Self::FileTooLarge { .. } => 413,
            Self::InvalidContentType(_) | Self::InvalidFileType(_) => 415,
            _ => match self.category() {
                ErrorCategory::BadInput => 400,
                ErrorCategory::UnprocessableContent => 422,
                ErrorCategory::TemporarilyUnavailable => 503,
                ErrorCategory::Internal => 500,
            },
        }
    }

    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::InvalidContentType(_)
            | Self::FileTooLarge { .. }
            | Self::InvalidFileType(_)
            | Self::NoFile
            | Self::StreamError(_)
            | Self::IncompleteUpload { .. } => PipelineStage::Validation,
            Self::ExtractionFailed(_) | Self::EmptyContent => PipelineStage::Extraction,
            Self::ServiceUnavailable(_) | Self::Cancelled { .. } => PipelineStage::Inference,
            Self::Internal(_) => PipelineStage::Storage,
        }
    }

    /// Short machine-readable reason
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidContentType(_) => "invalid_content_type",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::InvalidFileType(_) => "invalid_type",
            Self::NoFile => "no_file",
            Self::StreamError(_) => "stream_error",
            Self::IncompleteUpload { .. } => "incomplete_upload",
            Self::ExtractionFailed(_) => "extraction_failed",
            Self::EmptyContent => "empty_content",
            Self::ServiceUnavailable(failure) => failure.reason.as_str(),
            Self::Cancelled { .. } => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let (attempts, processing_time_ms) = match self {
            Self::ServiceUnavailable(failure) => (Some(failure.attempts), Some(failure.elapsed_ms)),
            Self::Cancelled {
                attempts,
                elapsed_ms,
            } => (Some(*attempts), Some(*elapsed_ms)),
            _ => (None, None),
        };

        ErrorPayload {
            category: self.category(),
            message: self.to_string(),
            details: Some(ErrorDetails {
                stage: self.stage(),
                status: self.status_code(),
                timestamp: Utc::now(),
                reason: self.code().to_string(),
                attempts,
                processing_time_ms,
            }),
        }
    }
}

/// Error body surfaced at the service boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub stage: PipelineStage,
    pub status: u16,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
