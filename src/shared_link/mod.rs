/// Shared link management
///
/// A shared link is a capability: whoever presents its key acts with the
/// link's scope (one album or an explicit asset list) until it expires or
/// is deleted.
use crate::{
    access::{AccessOracle, Actor, Permission},
    db::{self, to_micros},
    error::{MediaError, MediaResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

/// Stored shared link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedLink {
    pub id: String,
    pub key: String,
    pub user_id: String,
    pub album_id: Option<String>,
    pub asset_ids: Vec<String>,
    pub allow_upload: bool,
    pub allow_download: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SharedLink {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }
}

/// Request to create a shared link
#[derive(Debug, Clone, Default)]
pub struct CreateSharedLink {
    pub album_id: Option<String>,
    pub asset_ids: Vec<String>,
    pub allow_upload: bool,
    pub allow_download: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Shared link repository
#[async_trait]
pub trait SharedLinkStore: Send + Sync {
    async fn create(&self, link: &SharedLink) -> MediaResult<()>;

    async fn find_by_id(&self, id: &str) -> MediaResult<Option<SharedLink>>;

    async fn find_by_key(&self, key: &str) -> MediaResult<Option<SharedLink>>;

    async fn delete(&self, id: &str) -> MediaResult<bool>;

    /// Extend an explicit-asset link
    async fn add_assets(&self, link_id: &str, asset_ids: &[String]) -> MediaResult<()>;
}

/// SQLite-backed shared link store
#[derive(Clone)]
pub struct SqliteSharedLinkStore {
    db: SqlitePool,
}

impl SqliteSharedLinkStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    async fn find_where(&self, column: &str, value: &str) -> MediaResult<Option<SharedLink>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT id, key, user_id, album_id, allow_upload, allow_download, expires_at, created_at
            FROM shared_links
            WHERE {} = ?1
            "#,
            column
        ))
        .bind(value)
        .fetch_optional(&self.db)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let id: String = row.try_get("id")?;
        let asset_ids = sqlx::query_scalar(
            "SELECT asset_id FROM shared_link_assets WHERE shared_link_id = ?1 ORDER BY asset_id",
        )
        .bind(&id)
        .fetch_all(&self.db)
        .await?;
        let expires_at: Option<i64> = row.try_get("expires_at")?;

        Ok(Some(SharedLink {
            id,
            key: row.try_get("key")?,
            user_id: row.try_get("user_id")?,
            album_id: row.try_get("album_id")?,
            asset_ids,
            allow_upload: row.try_get("allow_upload")?,
            allow_download: row.try_get("allow_download")?,
            expires_at: expires_at.map(db::from_micros),
            created_at: db::from_micros(row.try_get("created_at")?),
        }))
    }
}

#[async_trait]
impl SharedLinkStore for SqliteSharedLinkStore {
    async fn create(&self, link: &SharedLink) -> MediaResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO shared_links (id, key, user_id, album_id, allow_upload, allow_download, expires_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&link.id)
        .bind(&link.key)
        .bind(&link.user_id)
        .bind(&link.album_id)
        .bind(link.allow_upload)
        .bind(link.allow_download)
        .bind(link.expires_at.map(to_micros))
        .bind(to_micros(link.created_at))
        .execute(&mut *tx)
        .await?;

        for asset_id in &link.asset_ids {
            sqlx::query("INSERT OR IGNORE INTO shared_link_assets (shared_link_id, asset_id) VALUES (?1, ?2)")
                .bind(&link.id)
                .bind(asset_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> MediaResult<Option<SharedLink>> {
        self.find_where("id", id).await
    }

    async fn find_by_key(&self, key: &str) -> MediaResult<Option<SharedLink>> {
        self.find_where("key", key).await
    }

    async fn delete(&self, id: &str) -> MediaResult<bool> {
        let result = sqlx::query("DELETE FROM shared_links WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_assets(&self, link_id: &str, asset_ids: &[String]) -> MediaResult<()> {
        for asset_id in asset_ids {
            sqlx::query("INSERT OR IGNORE INTO shared_link_assets (shared_link_id, asset_id) VALUES (?1, ?2)")
                .bind(link_id)
                .bind(asset_id)
                .execute(&self.db)
                .await?;
        }
        Ok(())
    }
}

/// Shared link service
#[derive(Clone)]
pub struct SharedLinkService {
    oracle: AccessOracle,
    store: Arc<dyn SharedLinkStore>,
}

impl SharedLinkService {
    pub fn new(oracle: AccessOracle, store: Arc<dyn SharedLinkStore>) -> Self {
        Self { oracle, store }
    }

    /// Generate a new link key
    pub fn generate_key() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(43)
            .map(char::from)
            .collect()
    }

    /// Create a link over one album or an explicit list of assets
    pub async fn create(&self, actor: &Actor, request: CreateSharedLink) -> MediaResult<SharedLink> {
        match (&request.album_id, request.asset_ids.is_empty()) {
            (Some(album_id), true) => {
                self.oracle
                    .require_permission(actor, Permission::SharedLinkCreate, album_id)
                    .await?
            }
            (None, false) => {
                self.oracle
                    .require_permission_many(actor, Permission::AssetShare, &request.asset_ids)
                    .await?
            }
            _ => {
                return Err(MediaError::Validation(
                    "A shared link needs either an album or a list of assets".to_string(),
                ))
            }
        }

        let now = db::now();
        if matches!(request.expires_at, Some(expires_at) if expires_at <= now) {
            return Err(MediaError::Validation("Expiry must be in the future".to_string()));
        }

        let mut asset_ids = request.asset_ids;
        asset_ids.sort();
        asset_ids.dedup();

        let link = SharedLink {
            id: Uuid::new_v4().to_string(),
            key: Self::generate_key(),
            user_id: actor.user_id.clone(),
            album_id: request.album_id,
            asset_ids,
            allow_upload: request.allow_upload,
            allow_download: request.allow_download,
            expires_at: request.expires_at.map(|t| db::from_micros(to_micros(t))),
            created_at: now,
        };
        self.store.create(&link).await?;

        tracing::info!(link = %link.id, user = %link.user_id, album = ?link.album_id, "shared link created");
        Ok(link)
    }

    /// Delete a link; requests presenting its key fail from now on
    pub async fn delete(&self, actor: &Actor, link_id: &str) -> MediaResult<()> {
        self.oracle
            .require_permission(actor, Permission::SharedLinkDelete, link_id)
            .await?;
        self.store.delete(link_id).await?;

        tracing::info!(link = %link_id, "shared link revoked");
        Ok(())
    }

    /// Resolve a presented key into a shared-link actor
    pub async fn resolve_key(&self, key: &str) -> MediaResult<Actor> {
        let link = self
            .store
            .find_by_key(key)
            .await?
            .ok_or_else(|| MediaError::Authentication("Invalid share key".to_string()))?;

        if link.is_expired(db::now()) {
            return Err(MediaError::Authentication("Shared link has expired".to_string()));
        }

        Ok(Actor::shared_link(link.user_id, link.id))
    }

    /// Record assets uploaded through an explicit-asset link
    pub async fn add_assets(&self, link_id: &str, asset_ids: &[String]) -> MediaResult<()> {
        self.store.add_assets(link_id, asset_ids).await
    }
}
