/// Raw ownership and grant lookups consumed only by the access oracle
use crate::{
    access::grants::{AlbumRole, SharedLinkGrant},
    db,
    error::MediaResult,
};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

/// Read-only view of ownership and grant records
#[async_trait]
pub trait AccessRepository: Send + Sync {
    /// Owner of an asset, including soft-deleted assets
    async fn asset_owner(&self, asset_id: &str) -> MediaResult<Option<String>>;

    /// Highest role `user_id` holds on any album containing the asset
    async fn asset_album_role(&self, user_id: &str, asset_id: &str) -> MediaResult<Option<AlbumRole>>;

    async fn album_owner(&self, album_id: &str) -> MediaResult<Option<String>>;

    /// Role of `user_id` on an album; the album owner holds `Owner`
    async fn album_role(&self, user_id: &str, album_id: &str) -> MediaResult<Option<AlbumRole>>;

    /// `(author, album)` of an activity
    async fn activity_record(&self, activity_id: &str) -> MediaResult<Option<(String, String)>>;

    async fn shared_link(&self, link_id: &str) -> MediaResult<Option<SharedLinkGrant>>;

    /// Whether the asset is in the link's explicit list or its album
    async fn shared_link_has_asset(&self, link_id: &str, asset_id: &str) -> MediaResult<bool>;

    /// Shared link explicit asset list
    async fn shared_link_assets(&self, link_id: &str) -> MediaResult<Vec<String>>;

    /// Albums a user owns or is a member of
    async fn member_album_ids(&self, user_id: &str) -> MediaResult<Vec<String>>;
}

/// SQLite-backed access repository
#[derive(Clone)]
pub struct SqliteAccessRepository {
    db: SqlitePool,
}

impl SqliteAccessRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

fn max_role(roles: Vec<String>) -> MediaResult<Option<AlbumRole>> {
    let mut best: Option<AlbumRole> = None;
    for role in roles {
        let role = AlbumRole::parse(&role)?;
        best = Some(best.map_or(role, |b| b.max(role)));
    }
    Ok(best)
}

#[async_trait]
impl AccessRepository for SqliteAccessRepository {
    async fn asset_owner(&self, asset_id: &str) -> MediaResult<Option<String>> {
        let owner = sqlx::query_scalar("SELECT owner_id FROM assets WHERE id = ?1")
            .bind(asset_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(owner)
    }

    async fn asset_album_role(&self, user_id: &str, asset_id: &str) -> MediaResult<Option<AlbumRole>> {
        let roles: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT 'owner' FROM album_assets aa
            JOIN albums a ON a.id = aa.album_id
            WHERE aa.asset_id = ?1 AND a.owner_id = ?2
            UNION ALL
            SELECT au.role FROM album_assets aa
            JOIN album_users au ON au.album_id = aa.album_id
            WHERE aa.asset_id = ?1 AND au.user_id = ?2
            "#,
        )
        .bind(asset_id)
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        max_role(roles)
    }

    async fn album_owner(&self, album_id: &str) -> MediaResult<Option<String>> {
        let owner = sqlx::query_scalar("SELECT owner_id FROM albums WHERE id = ?1")
            .bind(album_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(owner)
    }

    async fn album_role(&self, user_id: &str, album_id: &str) -> MediaResult<Option<AlbumRole>> {
        let roles: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT 'owner' FROM albums WHERE id = ?1 AND owner_id = ?2
            UNION ALL
            SELECT role FROM album_users WHERE album_id = ?1 AND user_id = ?2
            "#,
        )
        .bind(album_id)
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        max_role(roles)
    }

    async fn activity_record(&self, activity_id: &str) -> MediaResult<Option<(String, String)>> {
        let row = sqlx::query("SELECT user_id, album_id FROM activities WHERE id = ?1")
            .bind(activity_id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => Ok(Some((row.try_get("user_id")?, row.try_get("album_id")?))),
            None => Ok(None),
        }
    }

    async fn shared_link(&self, link_id: &str) -> MediaResult<Option<SharedLinkGrant>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, album_id, allow_upload, allow_download, expires_at
            FROM shared_links
            WHERE id = ?1
            "#,
        )
        .bind(link_id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => {
                let expires_at: Option<i64> = row.try_get("expires_at")?;
                Ok(Some(SharedLinkGrant {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    album_id: row.try_get("album_id")?,
                    allow_upload: row.try_get("allow_upload")?,
                    allow_download: row.try_get("allow_download")?,
                    expires_at: expires_at.map(db::from_micros),
                }))
            }
            None => Ok(None),
        }
    }

    async fn shared_link_has_asset(&self, link_id: &str, asset_id: &str) -> MediaResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM shared_link_assets
            WHERE shared_link_id = ?1 AND asset_id = ?2
            UNION ALL
            SELECT 1 FROM shared_links sl
            JOIN album_assets aa ON aa.album_id = sl.album_id
            WHERE sl.id = ?1 AND aa.asset_id = ?2
            LIMIT 1
            "#,
        )
        .bind(link_id)
        .bind(asset_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(found.is_some())
    }

    async fn shared_link_assets(&self, link_id: &str) -> MediaResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT asset_id FROM shared_link_assets WHERE shared_link_id = ?1",
        )
        .bind(link_id)
        .fetch_all(&self.db)
        .await?;
        Ok(ids)
    }

    async fn member_album_ids(&self, user_id: &str) -> MediaResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT id FROM albums WHERE owner_id = ?1
            UNION
            SELECT album_id FROM album_users WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(ids)
    }
}
