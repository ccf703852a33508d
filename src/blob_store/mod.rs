/// Blob Storage System
///
/// Byte storage for originals and sidecars. Uploads are streamed into a
/// staging area while their SHA-256 checksum is computed, then moved into a
/// backend under an opaque locator. Backends only ever see complete files.

pub mod disk;
pub mod models;
pub mod store;

pub use models::*;
pub use store::{BlobStore, BlobStoreConfig, PendingBlob, StagedBlob};

use crate::error::MediaResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;

/// Stream of blob content
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Blob storage backend trait
///
/// Implementations handle the actual storage and retrieval of blob data.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Move a fully written local file into the store under `locator`
    async fn put_file(&self, locator: &str, source: &Path) -> MediaResult<()>;

    /// Open a blob for streaming
    async fn open(&self, locator: &str) -> MediaResult<Option<ByteStream>>;

    /// Delete a blob; deleting a missing blob is not an error
    async fn delete(&self, locator: &str) -> MediaResult<()>;

    /// Check if a blob exists
    async fn exists(&self, locator: &str) -> MediaResult<bool>;
}
