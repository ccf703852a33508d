/// Disk-based blob storage backend
use crate::{
    blob_store::{BlobBackend, ByteStream},
    error::{MediaError, MediaResult},
};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio_util::io::ReaderStream;

/// Disk storage backend
///
/// Locators look like `{owner}/{name}`. Files are sharded by the first two
/// characters of the name to prevent too many files in one directory:
/// `{base}/{owner}/{first2chars}/{name}`.
#[derive(Clone)]
pub struct DiskBlobBackend {
    base_path: PathBuf,
}

impl DiskBlobBackend {
    /// Create a new disk storage backend
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Get the file path for a locator
    fn get_blob_path(&self, locator: &str) -> MediaResult<PathBuf> {
        let relative = Path::new(locator);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if locator.is_empty() || !safe {
            return Err(MediaError::BlobStorage(format!("Invalid locator: {}", locator)));
        }

        let name = relative
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MediaError::BlobStorage(format!("Invalid locator: {}", locator)))?;
        let shard = name.get(0..2).unwrap_or("_");
        let parent = relative.parent().unwrap_or_else(|| Path::new(""));

        Ok(self.base_path.join(parent).join(shard).join(name))
    }

    /// Ensure the directory for a blob exists
    async fn ensure_blob_dir(&self, locator: &str) -> MediaResult<PathBuf> {
        let blob_path = self.get_blob_path(locator)?;
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                MediaError::BlobStorage(format!("Failed to create blob directory: {}", e))
            })?;
        }
        Ok(blob_path)
    }
}

#[async_trait]
impl BlobBackend for DiskBlobBackend {
    async fn put_file(&self, locator: &str, source: &Path) -> MediaResult<()> {
        let blob_path = self.ensure_blob_dir(locator).await?;

        if fs::rename(source, &blob_path).await.is_err() {
            // Staging may live on another filesystem
            fs::copy(source, &blob_path).await.map_err(|e| {
                MediaError::BlobStorage(format!("Failed to write blob {}: {}", locator, e))
            })?;
            fs::remove_file(source).await?;
        }

        Ok(())
    }

    async fn open(&self, locator: &str) -> MediaResult<Option<ByteStream>> {
        let blob_path = self.get_blob_path(locator)?;

        match fs::File::open(&blob_path).await {
            Ok(file) => Ok(Some(Box::pin(ReaderStream::new(file)))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MediaError::BlobStorage(format!(
                "Failed to read blob {}: {}",
                locator, e
            ))),
        }
    }

    async fn delete(&self, locator: &str) -> MediaResult<()> {
        let blob_path = self.get_blob_path(locator)?;

        match fs::remove_file(&blob_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MediaError::BlobStorage(format!(
                "Failed to delete blob {}: {}",
                locator, e
            ))),
        }
    }

    async fn exists(&self, locator: &str) -> MediaResult<bool> {
        let blob_path = self.get_blob_path(locator)?;
        Ok(fs::try_exists(&blob_path).await.unwrap_or(false))
    }
}
