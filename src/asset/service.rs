/// Permission-gated reads, downloads and the soft-delete lifecycle
use crate::{
    access::{AccessOracle, Actor, Permission},
    asset::{Asset, AssetSearch, AssetStore, UpdateAsset},
    blob_store::{BlobStore, ByteStream},
    error::{MediaError, MediaResult},
};
use std::sync::Arc;

/// Largest page `list` returns
pub const MAX_BROWSE_PAGE: u32 = 1000;

/// A streamable original
pub struct OriginalFile {
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub stream: ByteStream,
}

/// Asset service
#[derive(Clone)]
pub struct AssetService {
    oracle: AccessOracle,
    assets: Arc<dyn AssetStore>,
    blobs: BlobStore,
}

impl AssetService {
    pub fn new(oracle: AccessOracle, assets: Arc<dyn AssetStore>, blobs: BlobStore) -> Self {
        Self {
            oracle,
            assets,
            blobs,
        }
    }

    /// Fetch an asset the actor can read. Trashed assets are only visible
    /// to their owner.
    pub async fn get(&self, actor: &Actor, asset_id: &str) -> MediaResult<Asset> {
        self.oracle
            .require_permission(actor, Permission::AssetRead, asset_id)
            .await?;
        let asset = self.load(asset_id).await?;

        if asset.is_deleted() && (actor.is_shared_link() || asset.owner_id != actor.user_id) {
            return Err(MediaError::NotFound(asset_id.to_string()));
        }
        Ok(asset)
    }

    /// Stream the original bytes
    pub async fn open_original(&self, actor: &Actor, asset_id: &str) -> MediaResult<OriginalFile> {
        self.oracle
            .require_permission(actor, Permission::AssetViewOriginal, asset_id)
            .await?;
        let asset = self.load(asset_id).await?;
        if asset.is_deleted() {
            return Err(MediaError::NotFound(asset_id.to_string()));
        }

        let stream = self.blobs.open(&asset.original_path).await?;
        Ok(OriginalFile {
            file_name: asset.original_file_name,
            mime_type: asset.mime_type,
            size_bytes: asset.size_bytes,
            stream,
        })
    }

    /// Browse the actor's own library, newest file first
    pub async fn list(&self, actor: &Actor, mut filter: AssetSearch) -> MediaResult<Vec<Asset>> {
        self.oracle
            .require_permission(actor, Permission::LibraryRead, &actor.user_id)
            .await?;
        if let (Some(after), Some(before)) = (filter.updated_after, filter.updated_before) {
            if after >= before {
                return Err(MediaError::Validation(
                    "updatedAfter must be earlier than updatedBefore".to_string(),
                ));
            }
        }
        // Zero means no explicit page size
        filter.take = match filter.take {
            0 => MAX_BROWSE_PAGE,
            take => take.min(MAX_BROWSE_PAGE),
        };
        self.assets.search(&actor.user_id, &filter).await
    }

    /// Change the mutable fields of an asset the actor owns
    pub async fn update(&self, actor: &Actor, asset_id: &str, request: UpdateAsset) -> MediaResult<Asset> {
        self.oracle
            .require_permission(actor, Permission::AssetUpdate, asset_id)
            .await?;

        if let Some(is_favorite) = request.is_favorite {
            if !self.assets.set_favorite(asset_id, is_favorite).await? {
                return Err(MediaError::NotFound(asset_id.to_string()));
            }
        }
        self.load(asset_id).await
    }

    /// Move assets to the trash. The hidden half of a live photo follows
    /// its image. Every id is checked before anything is deleted, and the
    /// batch is applied in one transaction.
    pub async fn delete(&self, actor: &Actor, asset_ids: &[String]) -> MediaResult<u64> {
        self.oracle
            .require_permission_many(actor, Permission::AssetDelete, asset_ids)
            .await?;

        let deleted = self.assets.trash(asset_ids).await?;
        tracing::info!(user = %actor.user_id, count = deleted, "assets moved to trash");
        Ok(deleted)
    }

    /// Bring trashed assets back. Nothing is restored when any of them
    /// collides with a file already in the library.
    pub async fn restore(&self, actor: &Actor, asset_ids: &[String]) -> MediaResult<u64> {
        self.oracle
            .require_permission_many(actor, Permission::AssetRestore, asset_ids)
            .await?;

        let restored = self.assets.restore(asset_ids).await?;
        tracing::info!(user = %actor.user_id, count = restored, "assets restored");
        Ok(restored)
    }

    async fn load(&self, asset_id: &str) -> MediaResult<Asset> {
        self.assets
            .find_by_id(asset_id)
            .await?
            .ok_or_else(|| MediaError::NotFound(asset_id.to_string()))
    }
}
