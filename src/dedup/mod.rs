/// Content-addressed upload gate
///
/// Ingestion is idempotent per `(owner, checksum)`: a retried upload of the
/// same bytes returns the existing asset with `duplicate = true` and writes
/// nothing. Concurrent uploads of the same content are settled by the unique
/// index; the loser re-reads the winner.

pub mod existence;

pub use existence::{BulkCheckStatus, BulkExistenceChecker, BulkUploadCheckItem, BulkUploadCheckResult};

use crate::{
    access::{AccessOracle, Actor, Permission, SharedLinkGrant},
    asset::{Asset, AssetKind, AssetStore, NewAsset},
    blob_store::{BlobStore, Checksum, StagedBlob},
    error::{MediaError, MediaResult},
    metrics,
    shared_link::SharedLinkStore,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;

/// One uploaded file, already staged and hashed
#[derive(Debug)]
pub struct UploadFile {
    pub blob: StagedBlob,
    pub file_name: String,
    pub mime_type: String,
}

/// Client-supplied metadata for an upload
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub device_asset_id: String,
    pub device_id: String,
    pub file_created_at: DateTime<Utc>,
    pub file_modified_at: DateTime<Utc>,
    pub is_favorite: bool,
}

/// A complete upload request
#[derive(Debug)]
pub struct UploadRequest {
    pub asset: UploadFile,
    /// Video half of a live photo
    pub live_photo: Option<UploadFile>,
    /// Metadata sidecar; never an asset of its own
    pub sidecar: Option<StagedBlob>,
    pub metadata: UploadMetadata,
    /// Checksum announced by the client, verified against the bytes
    pub expected_checksum: Option<Checksum>,
}

/// Outcome of an ingest
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingested {
    pub asset: Asset,
    pub duplicate: bool,
}

/// What a new asset is attached to in its insert transaction
#[derive(Debug, Clone, Copy)]
enum Placement<'a> {
    Library,
    Album(&'a str),
    /// Hidden video of this live-photo image
    PairedWith(&'a str),
}

/// The dedup gate
#[derive(Clone)]
pub struct DedupGate {
    oracle: AccessOracle,
    assets: Arc<dyn AssetStore>,
    blobs: BlobStore,
    shared_links: Arc<dyn SharedLinkStore>,
}

impl DedupGate {
    pub fn new(
        oracle: AccessOracle,
        assets: Arc<dyn AssetStore>,
        blobs: BlobStore,
        shared_links: Arc<dyn SharedLinkStore>,
    ) -> Self {
        Self {
            oracle,
            assets,
            blobs,
            shared_links,
        }
    }

    /// Stream one upload part into staging.
    ///
    /// Checks the upload permission before reading any bytes.
    pub async fn stage<S, E>(&self, actor: &Actor, stream: S) -> MediaResult<StagedBlob>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        self.oracle
            .require_permission(actor, Permission::AssetUpload, &actor.user_id)
            .await?;
        self.blobs.stage(stream).await
    }

    /// Ingest an upload into the actor's target library
    pub async fn ingest(&self, actor: &Actor, request: UploadRequest) -> MediaResult<Ingested> {
        // For a shared-link actor `user_id` is the link owner's library
        let owner_id = actor.user_id.as_str();
        self.oracle
            .require_permission(actor, Permission::AssetUpload, owner_id)
            .await?;

        if let Some(expected) = request.expected_checksum {
            if expected != request.asset.blob.checksum {
                return Err(MediaError::Validation(format!(
                    "Checksum mismatch: expected {}, computed {}",
                    expected, request.asset.blob.checksum
                )));
            }
        }

        let link = self.oracle.shared_link_grant(actor).await?;
        let placement = match link.as_ref().and_then(|l| l.album_id.as_deref()) {
            Some(album_id) => Placement::Album(album_id),
            None => Placement::Library,
        };

        let mut result = self
            .ingest_one(
                owner_id,
                request.asset,
                &request.metadata,
                true,
                placement,
                request.sidecar,
            )
            .await?;

        // Pairing is not part of the key. An image that already has its
        // video keeps it, and the staged motion file is dropped here.
        if let Some(video) = request.live_photo {
            if result.asset.live_photo_pair_id.is_none() {
                self.pair_live_photo(owner_id, &mut result.asset, video, &request.metadata)
                    .await?;
            }
        }

        if let Some(link) = link {
            self.place_in_link(&link, &result).await?;
        }

        metrics::record_upload(if result.duplicate { "duplicate" } else { "created" });
        if result.duplicate {
            tracing::debug!(asset = %result.asset.id, owner = %owner_id, "duplicate upload");
        } else {
            tracing::info!(
                asset = %result.asset.id,
                owner = %owner_id,
                checksum = %result.asset.checksum,
                "asset ingested"
            );
        }

        Ok(result)
    }

    /// Attach the video half to an image that has none.
    ///
    /// A new video is inserted in the same transaction that points the
    /// image at it, so it never exists without its image.
    async fn pair_live_photo(
        &self,
        owner_id: &str,
        image: &mut Asset,
        video: UploadFile,
        metadata: &UploadMetadata,
    ) -> MediaResult<()> {
        let video = self
            .ingest_one(
                owner_id,
                video,
                metadata,
                false,
                Placement::PairedWith(&image.id),
                None,
            )
            .await?;
        if video.duplicate {
            self.assets.set_live_photo_pair(&image.id, &video.asset.id).await?;
        }

        if let Some(paired) = self.assets.find_by_id(&image.id).await? {
            *image = paired;
        }
        Ok(())
    }

    /// Make an upload through a link visible through that link
    async fn place_in_link(&self, link: &SharedLinkGrant, ingested: &Ingested) -> MediaResult<()> {
        match &link.album_id {
            // New assets were linked inside the insert transaction
            Some(album_id) if ingested.duplicate => {
                self.assets
                    .link_to_album(&ingested.asset.id, album_id, &link.user_id)
                    .await?;
            }
            Some(_) => {}
            None => {
                self.shared_links
                    .add_assets(&link.id, &[ingested.asset.id.clone()])
                    .await?;
            }
        }
        Ok(())
    }

    async fn ingest_one(
        &self,
        owner_id: &str,
        file: UploadFile,
        metadata: &UploadMetadata,
        is_visible: bool,
        placement: Placement<'_>,
        sidecar: Option<StagedBlob>,
    ) -> MediaResult<Ingested> {
        let checksum = file.blob.checksum;

        // Staged bytes (and any sidecar) are dropped, and so removed, here
        if let Some(existing) = self.assets.find_by_checksum(owner_id, &checksum).await? {
            return Ok(Ingested {
                asset: existing,
                duplicate: true,
            });
        }

        let size_bytes = file.blob.size as i64;
        let original = self.blobs.persist(file.blob, owner_id).await?;
        let sidecar = match sidecar {
            Some(staged) => Some(self.blobs.persist(staged, owner_id).await?),
            None => None,
        };

        let new_asset = NewAsset {
            owner_id: owner_id.to_string(),
            checksum,
            kind: AssetKind::from_mime(&file.mime_type),
            original_path: original.locator().to_string(),
            original_file_name: file.file_name,
            mime_type: file.mime_type,
            size_bytes,
            device_asset_id: metadata.device_asset_id.clone(),
            device_id: metadata.device_id.clone(),
            file_created_at: metadata.file_created_at,
            file_modified_at: metadata.file_modified_at,
            is_favorite: metadata.is_favorite,
            is_visible,
            live_photo_pair_id: None,
            sidecar_path: sidecar.as_ref().map(|s| s.locator().to_string()),
        };

        let created = match placement {
            Placement::Library => self.assets.create(new_asset, None).await,
            Placement::Album(album_id) => self.assets.create(new_asset, Some(album_id)).await,
            Placement::PairedWith(image_id) => self.assets.create_paired(new_asset, image_id).await,
        };
        match created {
            Ok(asset) => {
                original.commit();
                if let Some(sidecar) = sidecar {
                    sidecar.commit();
                }
                Ok(Ingested {
                    asset,
                    duplicate: false,
                })
            }
            Err(MediaError::ChecksumConflict { .. }) => {
                // Lost the race; the pending blobs roll back on drop
                drop(original);
                drop(sidecar);
                let winner = self
                    .assets
                    .find_by_checksum(owner_id, &checksum)
                    .await?
                    .ok_or_else(|| {
                        MediaError::Internal(format!("Conflicting asset for {} vanished", checksum))
                    })?;
                tracing::debug!(asset = %winner.id, "concurrent upload settled on existing asset");
                Ok(Ingested {
                    asset: winner,
                    duplicate: true,
                })
            }
            Err(e) => Err(e),
        }
    }
}
