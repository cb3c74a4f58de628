//! Artifact storage
//!
//! Streaming-first storage for uploaded documents. Bytes are written as they
//! arrive and never buffered whole; a write that fails or exceeds its limit
//! leaves nothing behind.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use redraft_core::HealthCheck;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Boxed asynchronous byte stream accepted by the store
pub type ByteStream<'a> = Pin<Box<dyn Stream<Item = Result<Bytes, StoreError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("io error: {0}")]
    Io(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("limit of {limit} bytes exceeded")]
    LimitExceeded { limit: u64, received: u64 },
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound
        } else {
            StoreError::Io(e.to_string())
        }
    }
}

/// Result of a completed write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub location: PathBuf,
    pub size_bytes: u64,
}

/// Trait abstracting over artifact storage backends.
#[async_trait]
pub trait ArtifactStore: HealthCheck {
    /// Write the stream to a fresh location, failing once more than `limit`
    /// bytes arrive. Nothing is left behind on failure.
    async fn put(&self, data: ByteStream<'_>, limit: u64) -> Result<StoredBlob, StoreError>;

    /// Read a stored artifact in full
    async fn read(&self, location: &Path) -> Result<Vec<u8>, StoreError>;

    /// Size of a stored artifact, if present
    async fn head(&self, location: &Path) -> Result<Option<u64>, StoreError>;

    /// Delete the artifact if present. Returns whether anything was deleted.
    async fn delete(&self, location: &Path) -> Result<bool, StoreError>;
}

/// Filesystem store rooted at a temporary upload directory
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Create the store, creating the root directory if needed
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Artifact store ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fresh_location(&self) -> PathBuf {
        self.root.join(format!("{}.upload", Uuid::new_v4()))
    }

    /// Only paths directly under the root are addressable
    fn contains(&self, location: &Path) -> bool {
        location.parent() == Some(self.root.as_path())
    }

    async fn write_stream(
        &self,
        location: &Path,
        mut data: ByteStream<'_>,
        limit: u64,
    ) -> Result<u64, StoreError> {
        let mut file = fs::File::create(location).await?;
        let mut received: u64 = 0;

        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            received = received.saturating_add(chunk.len() as u64);
            if received > limit {
                return Err(StoreError::LimitExceeded { limit, received });
            }
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(received)
    }
}

/// A file being written by [`FsArtifactStore::put`]. Removed on drop unless
/// kept, which covers both failed writes and abandoned upload futures.
struct PartialFile {
    location: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(location: PathBuf) -> Self {
        Self {
            location,
            armed: true,
        }
    }

    fn path(&self) -> &Path {
        &self.location
    }

    fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.location)
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.location) {
            Ok(()) => debug!(location = %self.location.display(), "Partial artifact removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                location = %self.location.display(),
                error = %e,
                "Failed to remove partial artifact"
            ),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, data: ByteStream<'_>, limit: u64) -> Result<StoredBlob, StoreError> {
        let partial = PartialFile::new(self.fresh_location());

        let size_bytes = self.write_stream(partial.path(), data, limit).await?;
        let location = partial.keep();
        debug!(location = %location.display(), size_bytes, "Artifact stored");

        Ok(StoredBlob {
            location,
            size_bytes,
        })
    }

    async fn read(&self, location: &Path) -> Result<Vec<u8>, StoreError> {
        if !self.contains(location) {
            return Err(StoreError::NotFound);
        }
        Ok(fs::read(location).await?)
    }

    async fn head(&self, location: &Path) -> Result<Option<u64>, StoreError> {
        if !self.contains(location) {
            return Ok(None);
        }
        match fs::metadata(location).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, location: &Path) -> Result<bool, StoreError> {
        if !self.contains(location) {
            return Ok(false);
        }
        match fs::remove_file(location).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl HealthCheck for FsArtifactStore {
    fn component_name(&self) -> &str {
        "artifact_store"
    }

    async fn health_check(&self) -> Result<(), String> {
        let probe = self.root.join(format!(".probe-{}", Uuid::new_v4()));
        fs::write(&probe, b"ok")
            .await
            .map_err(|e| format!("upload directory is not writable: {}", e))?;
        fs::remove_file(&probe)
            .await
            .map_err(|e| format!("probe file could not be removed: {}", e))
    }
}
