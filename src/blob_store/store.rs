/// Blob Store Manager
///
/// Streams uploads into staging while hashing, and hands persisted blobs
/// back as guards that remove the bytes again unless the caller commits.
use crate::{
    blob_store::{disk::DiskBlobBackend, BlobBackend, ByteStream, Checksum},
    error::{MediaError, MediaResult},
};
use bytes::Bytes;
use futures::{pin_mut, Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

/// Blob store configuration
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    pub location: PathBuf,
    pub staging_location: PathBuf,
    pub max_upload_size: u64,
}

/// An upload fully written to staging, with its checksum.
///
/// The staged file is removed when this value is dropped without being
/// persisted.
#[derive(Debug)]
pub struct StagedBlob {
    path: Option<PathBuf>,
    pub checksum: Checksum,
    pub size: u64,
}

impl StagedBlob {
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove staged upload {:?}: {}", path, e);
                }
            }
        }
    }
}

/// A blob moved into permanent storage but not yet referenced by a
/// committed row. Dropping it without `commit` deletes the bytes.
pub struct PendingBlob {
    locator: String,
    backend: Arc<dyn BlobBackend>,
    armed: bool,
}

impl PendingBlob {
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Keep the bytes; the referencing row is committed
    pub fn commit(mut self) -> String {
        self.armed = false;
        std::mem::take(&mut self.locator)
    }
}

impl Drop for PendingBlob {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let locator = std::mem::take(&mut self.locator);
        let backend = Arc::clone(&self.backend);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = backend.delete(&locator).await {
                        tracing::warn!("Failed to roll back blob {}: {}", locator, e);
                    } else {
                        tracing::debug!("Rolled back uncommitted blob {}", locator);
                    }
                });
            }
            Err(_) => tracing::warn!("No runtime to roll back blob {}", locator),
        }
    }
}

/// Main blob store manager
#[derive(Clone)]
pub struct BlobStore {
    config: BlobStoreConfig,
    backend: Arc<dyn BlobBackend>,
}

impl BlobStore {
    /// Create a blob store backed by local disk
    pub fn new(config: BlobStoreConfig) -> Self {
        let backend = Arc::new(DiskBlobBackend::new(config.location.clone()));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: BlobStoreConfig, backend: Arc<dyn BlobBackend>) -> Self {
        Self { config, backend }
    }

    /// Stream an upload into staging, hashing every chunk as it is written.
    ///
    /// Empty uploads and uploads over the size limit are rejected; a read or
    /// write failure leaves nothing behind.
    pub async fn stage<S, E>(&self, stream: S) -> MediaResult<StagedBlob>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        fs::create_dir_all(&self.config.staging_location)
            .await
            .map_err(|e| MediaError::BlobStorage(format!("Failed to create staging directory: {}", e)))?;

        let path = self.config.staging_location.join(Uuid::new_v4().to_string());
        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| MediaError::BlobStorage(format!("Failed to create staged upload: {}", e)))?;

        // Owns the path from here on so every early return cleans up
        let mut staged = StagedBlob {
            path: Some(path),
            checksum: Checksum::from_digest([0; Checksum::LEN]),
            size: 0,
        };

        let mut hasher = Sha256::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| MediaError::Validation(format!("Upload interrupted: {}", e)))?;
            staged.size += chunk.len() as u64;
            if staged.size > self.config.max_upload_size {
                return Err(MediaError::Validation(format!(
                    "Upload exceeds maximum size of {} bytes",
                    self.config.max_upload_size
                )));
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }

        if staged.size == 0 {
            return Err(MediaError::Validation("Upload is empty".to_string()));
        }

        file.flush().await?;
        file.sync_all().await?;

        staged.checksum = Checksum::from_digest(hasher.finalize().into());
        Ok(staged)
    }

    /// Stage an in-memory buffer
    pub async fn stage_bytes(&self, data: Vec<u8>) -> MediaResult<StagedBlob> {
        let chunk: Result<Bytes, std::io::Error> = Ok(Bytes::from(data));
        self.stage(futures::stream::iter(vec![chunk])).await
    }

    /// Move a staged upload into permanent storage for `owner_id`
    pub async fn persist(&self, mut staged: StagedBlob, owner_id: &str) -> MediaResult<PendingBlob> {
        let path = staged
            .path
            .take()
            .ok_or_else(|| MediaError::Internal("Staged upload already persisted".to_string()))?;
        let locator = format!("{}/{}", owner_id, Uuid::new_v4());

        if let Err(e) = self.backend.put_file(&locator, &path).await {
            let _ = fs::remove_file(&path).await;
            return Err(e);
        }

        Ok(PendingBlob {
            locator,
            backend: Arc::clone(&self.backend),
            armed: true,
        })
    }

    /// Open a blob for streaming
    pub async fn open(&self, locator: &str) -> MediaResult<ByteStream> {
        self.backend
            .open(locator)
            .await?
            .ok_or_else(|| MediaError::NotFound(format!("Blob not found: {}", locator)))
    }

    pub async fn exists(&self, locator: &str) -> MediaResult<bool> {
        self.backend.exists(locator).await
    }

    /// Delete a blob
    pub async fn delete(&self, locator: &str) -> MediaResult<()> {
        self.backend.delete(locator).await
    }

    /// Remove staged uploads older than `max_age` left behind by crashes
    pub async fn cleanup_staging(&self, max_age: Duration) -> MediaResult<u64> {
        let mut entries = match fs::read_dir(&self.config.staging_location).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if modified < cutoff {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!("Failed to remove staged upload {:?}: {}", entry.path(), e),
                }
            }
        }

        Ok(removed)
    }
}
