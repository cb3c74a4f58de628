//! Document ingestion and optimization pipeline for Redraft
//!
//! Takes one uploaded document from a byte stream to rewritten text:
//!
//! - Streaming upload validation into an [`ArtifactStore`], with a scoped
//!   [`ArtifactGuard`] that deletes the stored bytes on every exit path
//! - Text extraction for plain text and Word documents
//! - Paragraph-first chunking bounded by a character budget
//! - The [`OptimizationPipeline`] that drives chunks through the bounded
//!   scheduler and aggregates the result

pub mod chunking;
pub mod extractors;
pub mod pipeline;
pub mod store;
pub mod upload;

pub use chunking::TextChunker;
pub use extractors::{
    ContentExtractor, DocxExtractor, ExtractionResult, ExtractorRegistry, PlainTextExtractor,
    TextExtractor,
};
pub use pipeline::OptimizationPipeline;
pub use store::{ArtifactStore, ByteStream, FsArtifactStore, StoreError, StoredBlob};
pub use upload::{ArtifactGuard, UploadPolicy, UploadValidator};

use redraft_core::PipelineError;

/// Error types for ingestion operations
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
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

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Document contains no text")]
    EmptyContent,

    #[error("Chunking failed: {0}")]
    ChunkingFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, IngestionError>;

impl From<IngestionError> for PipelineError {
    fn from(err: IngestionError) -> Self {
        match err {
            IngestionError::InvalidContentType(ct) => PipelineError::InvalidContentType(ct),
            IngestionError::FileTooLarge { size, limit } => {
                PipelineError::FileTooLarge { size, limit }
            }
            IngestionError::InvalidFileType(name) => PipelineError::InvalidFileType(name),
            IngestionError::NoFile => PipelineError::NoFile,
            IngestionError::StreamError(msg) => PipelineError::StreamError(msg),
            IngestionError::IncompleteUpload { expected, received } => {
                PipelineError::IncompleteUpload { expected, received }
            }
            IngestionError::ExtractionFailed(msg) => PipelineError::ExtractionFailed(msg),
            IngestionError::EmptyContent => PipelineError::EmptyContent,
            IngestionError::ChunkingFailed(msg) => PipelineError::Internal(msg),
            IngestionError::Storage(err) => PipelineError::Internal(err.to_string()),
        }
    }
}
