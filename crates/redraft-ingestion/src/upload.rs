//! Upload validation and artifact ownership

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use redraft_core::{DocumentKind, UploadArtifact, UploadConfig};
use tracing::{debug, info, warn};

use crate::store::{ArtifactStore, ByteStream, StoreError};
use crate::{IngestionError, Result};

/// Slack allowed for multipart framing when pre-checking a request's
/// declared body length against the file size ceiling.
pub const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

const MULTIPART_FORM_DATA: &str = "multipart/form-data";
const OCTET_STREAM: &str = "application/octet-stream";

/// Allow-lists and size ceiling applied to every upload
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub allowed_mime_types: Vec<String>,
}

impl UploadPolicy {
    fn extension_allowed(&self, ext: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    fn mime_allowed(&self, essence: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(essence))
    }
}

impl From<&UploadConfig> for UploadPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_file_size_bytes: config.max_file_size_bytes,
            allowed_extensions: config.allowed_extensions.clone(),
            allowed_mime_types: config.allowed_mime_types.clone(),
        }
    }
}

/// Validates one upload and streams it into the artifact store
pub struct UploadValidator {
    policy: UploadPolicy,
    store: Arc<dyn ArtifactStore>,
}

impl UploadValidator {
    pub fn new(policy: UploadPolicy, store: Arc<dyn ArtifactStore>) -> Self {
        Self { policy, store }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Largest request body worth reading for one upload
    pub fn body_limit(&self) -> u64 {
        self.policy
            .max_file_size_bytes
            .saturating_add(MULTIPART_OVERHEAD_BYTES)
    }

    /// The request body must be `multipart/form-data`
    pub fn validate_content_type(&self, content_type: Option<&str>) -> Result<()> {
        let content_type = content_type.unwrap_or_default();
        let essence = content_type.split(';').next().unwrap_or_default().trim();

        if essence.eq_ignore_ascii_case(MULTIPART_FORM_DATA) {
            Ok(())
        } else {
            Err(IngestionError::InvalidContentType(if content_type.is_empty() {
                "missing".to_string()
            } else {
                content_type.to_string()
            }))
        }
    }

    /// Reject early when the declared body length cannot possibly fit
    pub fn check_declared_length(&self, content_length: Option<u64>) -> Result<()> {
        let limit = self.policy.max_file_size_bytes;
        match content_length {
            Some(length) if length > self.body_limit() => {
                Err(IngestionError::FileTooLarge {
                    size: length,
                    limit,
                })
            }
            _ => Ok(()),
        }
    }

    /// Resolve the document kind and the MIME type to record.
    ///
    /// The extension decides the kind. A declared MIME type must be in the
    /// allow-list and agree with the extension; `application/octet-stream`
    /// is treated as undeclared.
    pub fn resolve_kind(
        &self,
        filename: &str,
        declared_mime: Option<&str>,
    ) -> Result<(DocumentKind, String)> {
        let invalid = || IngestionError::InvalidFileType(filename.to_string());

        let ext = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(invalid)?;
        if !self.policy.extension_allowed(ext) {
            return Err(invalid());
        }
        let kind = DocumentKind::from_filename(filename).ok_or_else(invalid)?;

        let declared = declared_mime
            .map(|mime| mime.split(';').next().unwrap_or_default().trim())
            .filter(|essence| !essence.is_empty() && !essence.eq_ignore_ascii_case(OCTET_STREAM));

        let mime = match declared {
            Some(essence) => {
                if !self.policy.mime_allowed(essence) || DocumentKind::from_mime(essence) != Some(kind)
                {
                    return Err(invalid());
                }
                essence.to_string()
            }
            None => mime_guess::from_path(filename)
                .first_raw()
                .unwrap_or(kind.mime_type())
                .to_string(),
        };

        Ok((kind, mime))
    }

    /// Stream one file into the store.
    ///
    /// Bytes are counted as they arrive; the write stops as soon as the
    /// ceiling is crossed. `expected_size` is checked once the stream ends.
    pub async fn accept(
        &self,
        filename: &str,
        declared_mime: Option<&str>,
        data: ByteStream<'_>,
        expected_size: Option<u64>,
    ) -> Result<ArtifactGuard> {
        let (kind, mime) = self.resolve_kind(filename, declared_mime)?;
        let limit = self.policy.max_file_size_bytes;

        let blob = self.store.put(data, limit).await.map_err(|err| match err {
            StoreError::LimitExceeded { limit, received } => IngestionError::FileTooLarge {
                size: received,
                limit,
            },
            StoreError::Stream(msg) => IngestionError::StreamError(msg),
            other => IngestionError::Storage(other),
        })?;

        let artifact = UploadArtifact {
            location: blob.location,
            original_filename: filename.to_string(),
            declared_mime: mime,
            kind,
            size_bytes: blob.size_bytes,
            created_at: Utc::now(),
        };
        let guard = ArtifactGuard::new(artifact, Arc::clone(&self.store));

        if let Some(expected) = expected_size {
            if expected != guard.artifact().size_bytes {
                let received = guard.artifact().size_bytes;
                guard.release().await;
                return Err(IngestionError::IncompleteUpload { expected, received });
            }
        }

        info!(
            filename = %guard.artifact().original_filename,
            kind = ?guard.artifact().kind,
            size_bytes = guard.artifact().size_bytes,
            "Upload accepted"
        );
        Ok(guard)
    }
}

/// Exclusive owner of one stored upload.
///
/// The stored bytes are deleted exactly once: by [`ArtifactGuard::release`],
/// or on drop when the owning future goes away first.
pub struct ArtifactGuard {
    artifact: UploadArtifact,
    store: Arc<dyn ArtifactStore>,
    released: bool,
}

impl ArtifactGuard {
    pub fn new(artifact: UploadArtifact, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            artifact,
            store,
            released: false,
        }
    }

    pub fn artifact(&self) -> &UploadArtifact {
        &self.artifact
    }

    /// Read the stored bytes
    pub async fn read(&self) -> Result<Vec<u8>> {
        Ok(self.store.read(&self.artifact.location).await?)
    }

    /// Delete the stored bytes. Failures are logged, never surfaced.
    pub async fn release(mut self) {
        self.released = true;
        match self.store.delete(&self.artifact.location).await {
            Ok(deleted) => debug!(
                location = %self.artifact.location.display(),
                deleted,
                "Artifact released"
            ),
            Err(err) => warn!(
                location = %self.artifact.location.display(),
                error = %err,
                "Failed to delete artifact"
            ),
        }
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let location = self.artifact.location.clone();
        let store = Arc::clone(&self.store);
        let delete = async move {
            if let Err(err) = store.delete(&location).await {
                warn!(location = %location.display(), error = %err, "Failed to delete artifact");
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(delete);
            }
            // Dropped after the runtime went away: finish the delete on a
            // private runtime so every store backend sees it.
            Err(_) => match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(delete),
                Err(err) => warn!(
                    location = %self.artifact.location.display(),
                    error = %err,
                    "No runtime available, artifact left in place"
                ),
            },
        }
    }
}

impl std::fmt::Debug for ArtifactGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactGuard")
            .field("artifact", &self.artifact)
            .field("released", &self.released)
            .finish()
    }
}
