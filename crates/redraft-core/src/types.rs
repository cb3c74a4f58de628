use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ServiceFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Document formats accepted for optimization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    PlainText,
    WordDocument,
}

impl DocumentKind {
    pub const PLAIN_TEXT_MIME: &'static str = "text/plain";
    pub const WORD_DOCUMENT_MIME: &'static str =
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

    /// Resolve the kind from a filename extension
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "txt" => Some(Self::PlainText),
            "docx" => Some(Self::WordDocument),
            _ => None,
        }
    }

    /// Resolve the kind from a MIME type, ignoring parameters like `charset`
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        if essence.eq_ignore_ascii_case(Self::PLAIN_TEXT_MIME) {
            Some(Self::PlainText)
        } else if essence.eq_ignore_ascii_case(Self::WORD_DOCUMENT_MIME) {
            Some(Self::WordDocument)
        } else {
            None
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::PlainText => Self::PLAIN_TEXT_MIME,
            Self::WordDocument => Self::WORD_DOCUMENT_MIME,
        }
    }
}

/// A validated upload persisted to the artifact store.
///
/// Owned by exactly one request. Whoever holds it last is responsible for
/// deleting the stored bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadArtifact {
    /// Store key of the persisted bytes
    pub location: PathBuf,
    /// Filename as sent by the client
    pub original_filename: String,
    /// MIME type declared by the client (or inferred from the extension)
    pub declared_mime: String,
    /// Resolved document format
    pub kind: DocumentKind,
    /// Number of bytes written
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// One bounded segment of extracted text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// 0-based, dense position within the job
    pub ordinal: usize,
    pub text: String,
    /// Length in characters
    pub char_len: usize,
}

impl TextChunk {
    pub fn new(ordinal: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        let char_len = text.chars().count();
        Self {
            ordinal,
            text,
            char_len,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetryableError,
    FatalError,
}

/// Record of a single call against the inference endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationAttempt {
    pub chunk_ordinal: usize,
    /// 1-based attempt number
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub enum JobStatus {
    Completed,
    Failed(ServiceFailure),
    Cancelled,
}

impl JobStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobStatus::Completed)
    }
}

/// Terminal result of driving all chunks of a job through the invoker
#[derive(Debug, Clone)]
pub struct JobResult {
    /// Chunk outputs ordered by ordinal. Empty unless the job completed.
    pub outputs: Vec<String>,
    pub total_attempts: u32,
    /// Number of chunks that produced a successful output
    pub chunks_processed: usize,
    pub total_chunks: usize,
    pub elapsed: Duration,
    pub status: JobStatus,
}

impl JobResult {
    /// Join chunk outputs the same way the chunker splits paragraphs
    pub fn joined_output(&self) -> String {
        self.outputs.join("\n\n")
    }
}

/// Metadata returned alongside the optimized text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeMetadata {
    pub job_id: JobId,
    pub original_filename: String,
    pub attempts: u32,
    pub processing_time_ms: u64,
    pub chunks_processed: usize,
    pub total_chunks: usize,
    pub input_chars: usize,
    pub output_chars: usize,
}

/// Output of the "optimize" operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeOutput {
    pub optimized_text: String,
    pub metadata: OptimizeMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_kind_from_filename() {
        assert_eq!(DocumentKind::from_filename("notes.txt"), Some(DocumentKind::PlainText));
        assert_eq!(DocumentKind::from_filename("Report.DOCX"), Some(DocumentKind::WordDocument));
        assert_eq!(DocumentKind::from_filename("archive.tar.gz"), None);
        assert_eq!(DocumentKind::from_filename("README"), None);
    }

    #[test]
    fn test_document_kind_from_mime() {
        assert_eq!(
            DocumentKind::from_mime("text/plain; charset=utf-8"),
            Some(DocumentKind::PlainText)
        );
        assert_eq!(
            DocumentKind::from_mime(DocumentKind::WORD_DOCUMENT_MIME),
            Some(DocumentKind::WordDocument)
        );
        assert_eq!(DocumentKind::from_mime("application/pdf"), None);
    }

    #[test]
    fn test_text_chunk_counts_characters() {
        let chunk = TextChunk::new(0, "héllo");
        assert_eq!(chunk.char_len, 5);
        assert_eq!(chunk.ordinal, 0);
    }

    #[test]
    fn test_job_result_joins_with_blank_lines() {
        let result = JobResult {
            outputs: vec!["a".to_string(), "b".to_string()],
            total_attempts: 2,
            chunks_processed: 2,
            total_chunks: 2,
            elapsed: Duration::from_millis(5),
            status: JobStatus::Completed,
        };
        assert_eq!(result.joined_output(), "a\n\nb");
        assert!(result.status.is_completed());
    }
}
