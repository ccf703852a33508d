/// Shared albums
pub mod models;
pub mod store;

pub use models::{Album, AlbumDetails, AlbumMember, CreateAlbum, UpdateAlbum};
pub use store::{AlbumStore, SqliteAlbumStore};

use crate::{
    access::{AccessOracle, Actor, AlbumRole, Permission},
    db,
    error::{MediaError, MediaResult},
};
use std::sync::Arc;
use uuid::Uuid;

/// Album service
#[derive(Clone)]
pub struct AlbumService {
    oracle: AccessOracle,
    albums: Arc<dyn AlbumStore>,
}

impl AlbumService {
    pub fn new(oracle: AccessOracle, albums: Arc<dyn AlbumStore>) -> Self {
        Self { oracle, albums }
    }

    pub async fn create(&self, actor: &Actor, request: CreateAlbum) -> MediaResult<AlbumDetails> {
        if actor.is_shared_link() {
            return Err(MediaError::AccessDenied("Shared links cannot create albums".to_string()));
        }
        let name = request.name.trim();
        if name.is_empty() {
            return Err(MediaError::Validation("Album name is required".to_string()));
        }
        self.oracle
            .require_permission_many(actor, Permission::AssetShare, &request.asset_ids)
            .await?;
        for member in &request.members {
            validate_member(&actor.user_id, member)?;
        }

        let now = db::now();
        let album = Album {
            id: Uuid::new_v4().to_string(),
            owner_id: actor.user_id.clone(),
            name: name.to_string(),
            is_activity_enabled: true,
            created_at: now,
            updated_at: now,
        };
        self.albums
            .create(&album, &request.members, &request.asset_ids)
            .await?;

        tracing::info!(album = %album.id, owner = %album.owner_id, "album created");
        self.details(album).await
    }

    pub async fn get(&self, actor: &Actor, album_id: &str) -> MediaResult<AlbumDetails> {
        self.oracle
            .require_permission(actor, Permission::AlbumRead, album_id)
            .await?;
        let album = self.load(album_id).await?;
        self.details(album).await
    }

    pub async fn update(&self, actor: &Actor, album_id: &str, request: UpdateAlbum) -> MediaResult<Album> {
        self.oracle
            .require_permission(actor, Permission::AlbumUpdate, album_id)
            .await?;
        let mut album = self.load(album_id).await?;

        if let Some(name) = request.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(MediaError::Validation("Album name is required".to_string()));
            }
            album.name = name.to_string();
        }
        if let Some(enabled) = request.is_activity_enabled {
            album.is_activity_enabled = enabled;
        }
        album.updated_at = db::now();
        self.albums.update(&album).await?;
        Ok(album)
    }

    /// Add assets the actor may share; returns the ids newly added
    pub async fn add_assets(&self, actor: &Actor, album_id: &str, asset_ids: &[String]) -> MediaResult<Vec<String>> {
        self.oracle
            .require_permission(actor, Permission::AlbumAddAsset, album_id)
            .await?;
        self.oracle
            .require_permission_many(actor, Permission::AssetShare, asset_ids)
            .await?;

        self.albums.add_assets(album_id, asset_ids, &actor.user_id).await
    }

    /// Remove assets; everyone with album access gets tombstones
    pub async fn remove_assets(&self, actor: &Actor, album_id: &str, asset_ids: &[String]) -> MediaResult<Vec<String>> {
        self.oracle
            .require_permission(actor, Permission::AlbumRemoveAsset, album_id)
            .await?;
        let removed = self.albums.remove_assets(album_id, asset_ids).await?;
        tracing::debug!(album = %album_id, count = removed.len(), "assets removed from album");
        Ok(removed)
    }

    /// Share the album with a user. Everything in it becomes visible to
    /// them, so the contents are touched for their next delta sync.
    pub async fn add_member(&self, actor: &Actor, album_id: &str, member: AlbumMember) -> MediaResult<()> {
        self.oracle
            .require_permission(actor, Permission::AlbumShare, album_id)
            .await?;
        let album = self.load(album_id).await?;
        validate_member(&album.owner_id, &member)?;

        self.albums.upsert_member(album_id, &member.user_id, member.role).await?;

        tracing::info!(album = %album_id, user = %member.user_id, role = member.role.as_str(), "album shared");
        Ok(())
    }

    /// Revoke a membership. Members may always leave on their own.
    pub async fn remove_member(&self, actor: &Actor, album_id: &str, user_id: &str) -> MediaResult<()> {
        let leaving = !actor.is_shared_link() && actor.user_id == user_id;
        if !leaving {
            self.oracle
                .require_permission(actor, Permission::AlbumShare, album_id)
                .await?;
        }

        if !self.albums.remove_member(album_id, user_id).await? {
            return Err(MediaError::NotFound(format!("{} is not a member of {}", user_id, album_id)));
        }

        tracing::info!(album = %album_id, user = %user_id, "album membership revoked");
        Ok(())
    }

    pub async fn delete(&self, actor: &Actor, album_id: &str) -> MediaResult<()> {
        self.oracle
            .require_permission(actor, Permission::AlbumDelete, album_id)
            .await?;
        self.albums.delete(album_id).await?;
        tracing::info!(album = %album_id, "album deleted");
        Ok(())
    }

    async fn load(&self, album_id: &str) -> MediaResult<Album> {
        self.albums
            .find_by_id(album_id)
            .await?
            .ok_or_else(|| MediaError::NotFound(album_id.to_string()))
    }

    async fn details(&self, album: Album) -> MediaResult<AlbumDetails> {
        let members = self.albums.members(&album.id).await?;
        let asset_ids = self.albums.asset_ids(&album.id).await?;
        Ok(AlbumDetails {
            album,
            members,
            asset_ids,
        })
    }
}

/// Members hold viewer or editor; ownership is never granted by sharing
fn validate_member(owner_id: &str, member: &AlbumMember) -> MediaResult<()> {
    if member.user_id == owner_id {
        return Err(MediaError::Validation("The album owner cannot be added as a member".to_string()));
    }
    if member.role == AlbumRole::Owner {
        return Err(MediaError::Validation("Members can be viewers or editors".to_string()));
    }
    Ok(())
}
