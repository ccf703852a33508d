/// Album persistence
///
/// Every change that can take an asset out of someone's view writes
/// tombstones in the same transaction, so delta sync can report it.
/// Changes that widen visibility stamp the affected assets instead.
use crate::{
    access::AlbumRole,
    album::models::{Album, AlbumMember},
    asset::store::{insert_tombstones, link_assets, touch_album_assets},
    db::{self, placeholders, to_micros},
    error::MediaResult,
};
use async_trait::async_trait;
use sqlx::{Row, SqliteConnection, SqlitePool};

/// Album repository
#[async_trait]
pub trait AlbumStore: Send + Sync {
    /// Create the album with its first members and assets at once
    async fn create(&self, album: &Album, members: &[AlbumMember], asset_ids: &[String]) -> MediaResult<()>;

    async fn find_by_id(&self, id: &str) -> MediaResult<Option<Album>>;

    async fn update(&self, album: &Album) -> MediaResult<()>;

    async fn members(&self, album_id: &str) -> MediaResult<Vec<AlbumMember>>;

    async fn asset_ids(&self, album_id: &str) -> MediaResult<Vec<String>>;

    /// Link assets into the album. Returns the ids newly added.
    async fn add_assets(&self, album_id: &str, asset_ids: &[String], added_by: &str) -> MediaResult<Vec<String>>;

    /// Insert or change a membership. The album's contents are stamped so
    /// the member's next delta picks them up.
    async fn upsert_member(&self, album_id: &str, user_id: &str, role: AlbumRole) -> MediaResult<()>;

    /// Drop a membership and tombstone the album's assets for that user
    async fn remove_member(&self, album_id: &str, user_id: &str) -> MediaResult<bool>;

    /// Unlink assets and tombstone them for everyone with album access.
    /// Returns the ids that were actually in the album.
    async fn remove_assets(&self, album_id: &str, asset_ids: &[String]) -> MediaResult<Vec<String>>;

    /// Delete the album and tombstone its assets for everyone with access
    async fn delete(&self, album_id: &str) -> MediaResult<bool>;
}

/// SQLite-backed album store
#[derive(Clone)]
pub struct SqliteAlbumStore {
    db: SqlitePool,
}

impl SqliteAlbumStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

/// Owner plus members of an album
async fn audience(conn: &mut SqliteConnection, album_id: &str) -> MediaResult<Vec<String>> {
    let users = sqlx::query_scalar(
        r#"
        SELECT owner_id FROM albums WHERE id = ?1
        UNION
        SELECT user_id FROM album_users WHERE album_id = ?1
        "#,
    )
    .bind(album_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(users)
}

async fn album_asset_ids(conn: &mut SqliteConnection, album_id: &str) -> MediaResult<Vec<String>> {
    let ids = sqlx::query_scalar("SELECT asset_id FROM album_assets WHERE album_id = ?1 ORDER BY asset_id")
        .bind(album_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(ids)
}

async fn insert_member(conn: &mut SqliteConnection, album_id: &str, user_id: &str, role: AlbumRole) -> MediaResult<()> {
    sqlx::query(
        r#"
        INSERT INTO album_users (album_id, user_id, role) VALUES (?1, ?2, ?3)
        ON CONFLICT(album_id, user_id) DO UPDATE SET role = excluded.role
        "#,
    )
    .bind(album_id)
    .bind(user_id)
    .bind(role.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl AlbumStore for SqliteAlbumStore {
    async fn create(&self, album: &Album, members: &[AlbumMember], asset_ids: &[String]) -> MediaResult<()> {
        let (mut tx, stamp) = db::begin_stamped(&self.db).await?;

        sqlx::query(
            r#"
            INSERT INTO albums (id, owner_id, name, is_activity_enabled, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&album.id)
        .bind(&album.owner_id)
        .bind(&album.name)
        .bind(album.is_activity_enabled)
        .bind(to_micros(album.created_at))
        .bind(to_micros(album.updated_at))
        .execute(&mut *tx)
        .await?;

        for member in members {
            insert_member(&mut tx, &album.id, &member.user_id, member.role).await?;
        }
        link_assets(&mut tx, &album.id, asset_ids, &album.owner_id, stamp).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> MediaResult<Option<Album>> {
        let row = sqlx::query(
            "SELECT id, owner_id, name, is_activity_enabled, created_at, updated_at FROM albums WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => Ok(Some(Album {
                id: row.try_get("id")?,
                owner_id: row.try_get("owner_id")?,
                name: row.try_get("name")?,
                is_activity_enabled: row.try_get("is_activity_enabled")?,
                created_at: db::from_micros(row.try_get("created_at")?),
                updated_at: db::from_micros(row.try_get("updated_at")?),
            })),
            None => Ok(None),
        }
    }

    async fn update(&self, album: &Album) -> MediaResult<()> {
        sqlx::query("UPDATE albums SET name = ?1, is_activity_enabled = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(&album.name)
            .bind(album.is_activity_enabled)
            .bind(to_micros(album.updated_at))
            .bind(&album.id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn members(&self, album_id: &str) -> MediaResult<Vec<AlbumMember>> {
        let rows = sqlx::query("SELECT user_id, role FROM album_users WHERE album_id = ?1 ORDER BY user_id")
            .bind(album_id)
            .fetch_all(&self.db)
            .await?;

        rows.into_iter()
            .map(|row| -> MediaResult<AlbumMember> {
                let role: String = row.try_get("role")?;
                Ok(AlbumMember {
                    user_id: row.try_get("user_id")?,
                    role: AlbumRole::parse(&role)?,
                })
            })
            .collect()
    }

    async fn asset_ids(&self, album_id: &str) -> MediaResult<Vec<String>> {
        let mut conn = self.db.acquire().await?;
        album_asset_ids(&mut conn, album_id).await
    }

    async fn add_assets(&self, album_id: &str, asset_ids: &[String], added_by: &str) -> MediaResult<Vec<String>> {
        if asset_ids.is_empty() {
            return Ok(Vec::new());
        }
        let (mut tx, stamp) = db::begin_stamped(&self.db).await?;
        let added = link_assets(&mut tx, album_id, asset_ids, added_by, stamp).await?;
        tx.commit().await?;
        Ok(added)
    }

    async fn upsert_member(&self, album_id: &str, user_id: &str, role: AlbumRole) -> MediaResult<()> {
        let (mut tx, stamp) = db::begin_stamped(&self.db).await?;
        insert_member(&mut tx, album_id, user_id, role).await?;
        touch_album_assets(&mut tx, album_id, stamp).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove_member(&self, album_id: &str, user_id: &str) -> MediaResult<bool> {
        let (mut tx, stamp) = db::begin_stamped(&self.db).await?;

        let removed = sqlx::query("DELETE FROM album_users WHERE album_id = ?1 AND user_id = ?2")
            .bind(album_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        if removed {
            let asset_ids = album_asset_ids(&mut tx, album_id).await?;
            insert_tombstones(&mut tx, &[user_id.to_string()], &asset_ids, stamp).await?;
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn remove_assets(&self, album_id: &str, asset_ids: &[String]) -> MediaResult<Vec<String>> {
        if asset_ids.is_empty() {
            return Ok(Vec::new());
        }
        let (mut tx, stamp) = db::begin_stamped(&self.db).await?;

        let sql = format!(
            "SELECT asset_id FROM album_assets WHERE album_id = ? AND asset_id IN ({}) ORDER BY asset_id",
            placeholders(asset_ids.len())
        );
        let mut query = sqlx::query_scalar::<_, String>(&sql).bind(album_id);
        for id in asset_ids {
            query = query.bind(id);
        }
        let present = query.fetch_all(&mut *tx).await?;

        for asset_id in &present {
            sqlx::query("DELETE FROM album_assets WHERE album_id = ?1 AND asset_id = ?2")
                .bind(album_id)
                .bind(asset_id)
                .execute(&mut *tx)
                .await?;
        }

        let users = audience(&mut tx, album_id).await?;
        insert_tombstones(&mut tx, &users, &present, stamp).await?;

        tx.commit().await?;
        Ok(present)
    }

    async fn delete(&self, album_id: &str) -> MediaResult<bool> {
        let (mut tx, stamp) = db::begin_stamped(&self.db).await?;

        let users = audience(&mut tx, album_id).await?;
        let asset_ids = album_asset_ids(&mut tx, album_id).await?;
        insert_tombstones(&mut tx, &users, &asset_ids, stamp).await?;

        let deleted = sqlx::query("DELETE FROM albums WHERE id = ?1")
            .bind(album_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        tx.commit().await?;
        Ok(deleted)
    }
}
