/// Asset persistence
///
/// Writes that change what delta sync reports run in a stamped transaction
/// (see [`db::begin_stamped`]) and give every row they touch that stamp.
/// Delta and full sync reads each run in one read transaction, so all of
/// their streams come from the same snapshot.
use crate::{
    access::VisibilityScope,
    asset::models::{Asset, AssetRow, AssetSearch, ChangeSet, Cursor, LibraryPage, NewAsset, Tombstone},
    blob_store::Checksum,
    db::{self, placeholders, to_micros},
    error::{MediaError, MediaResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteArguments, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

const ASSET_COLUMNS: &str = "id, owner_id, checksum, kind, original_path, original_file_name, \
    mime_type, size_bytes, device_asset_id, device_id, file_created_at, file_modified_at, \
    is_favorite, is_visible, live_photo_pair_id, sidecar_path, created_at, updated_at, deleted_at";

/// Asset repository
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Any asset by id, deleted or not
    async fn find_by_id(&self, id: &str) -> MediaResult<Option<Asset>>;

    async fn find_by_ids(&self, ids: &[String]) -> MediaResult<Vec<Asset>>;

    /// The non-deleted asset of `owner_id` with this content
    async fn find_by_checksum(&self, owner_id: &str, checksum: &Checksum) -> MediaResult<Option<Asset>>;

    async fn find_by_checksums(&self, owner_id: &str, checksums: &[Checksum]) -> MediaResult<Vec<Asset>>;

    /// Insert a new asset, optionally linking it into an album in the same
    /// transaction. Fails with `ChecksumConflict` when a non-deleted asset
    /// with the same `(owner_id, checksum)` exists.
    async fn create(&self, asset: NewAsset, album_id: Option<&str>) -> MediaResult<Asset>;

    /// Insert the hidden video of a live photo and point `image_id` at it
    /// in the same transaction. Conflicts like `create`.
    async fn create_paired(&self, video: NewAsset, image_id: &str) -> MediaResult<Asset>;

    /// Move assets to the trash together with the hidden live-photo
    /// videos they own, all or nothing. Returns how many of `ids` changed.
    async fn trash(&self, ids: &[String]) -> MediaResult<u64>;

    /// Bring trashed assets and their live-photo videos back, all or
    /// nothing. Fails with `Validation` when any of them would collide with
    /// an identical file already in the library.
    async fn restore(&self, ids: &[String]) -> MediaResult<u64>;

    async fn set_live_photo_pair(&self, id: &str, pair_id: &str) -> MediaResult<()>;

    /// Returns false when the asset is trashed or does not exist
    async fn set_favorite(&self, id: &str, is_favorite: bool) -> MediaResult<bool>;

    /// Add an asset to an album and advance its `updated_at`, so members
    /// that just gained visibility see it in their next delta. Returns false
    /// when it was already in the album.
    async fn link_to_album(&self, asset_id: &str, album_id: &str, added_by: &str) -> MediaResult<bool>;

    /// Visible, non-deleted assets of `owner_id`, newest file first
    async fn search(&self, owner_id: &str, filter: &AssetSearch) -> MediaResult<Vec<Asset>>;

    /// Visible, non-deleted assets after `after` in `(created_at, id)` order,
    /// optionally bounded by `updated_at <= until`
    async fn library_page(
        &self,
        scope: &VisibilityScope,
        after: Option<&Cursor>,
        until: Option<DateTime<Utc>>,
        limit: u32,
    ) -> MediaResult<LibraryPage>;

    /// Upserts and deletions in scope plus tombstones of `user_id`, each
    /// strictly after `after` and capped at `limit`
    async fn changes_since(
        &self,
        scope: &VisibilityScope,
        user_id: &str,
        after: &Cursor,
        limit: u32,
    ) -> MediaResult<ChangeSet>;

    async fn prune_tombstones(&self, before: DateTime<Utc>) -> MediaResult<u64>;

    /// Device asset ids of `owner_id` already uploaded from `device_id`
    async fn existing_device_assets(
        &self,
        owner_id: &str,
        device_id: &str,
        device_asset_ids: &[String],
    ) -> MediaResult<Vec<String>>;

    /// Hard delete up to `limit` assets soft-deleted before `before`,
    /// returning the removed rows so their bytes can be released
    async fn purge_deleted_before(&self, before: DateTime<Utc>, limit: u32) -> MediaResult<Vec<Asset>>;
}

/// SQLite-backed asset store
#[derive(Clone)]
pub struct SqliteAssetStore {
    db: SqlitePool,
}

impl SqliteAssetStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    async fn fetch(&self, sql: &str, binds: Vec<Bind>) -> MediaResult<Vec<Asset>> {
        let mut conn = self.db.acquire().await?;
        fetch_assets(&mut conn, sql, binds).await
    }
}

/// Dynamically bound value
enum Bind {
    Text(String),
    Int(i64),
}

fn bound(sql: &str, binds: Vec<Bind>) -> sqlx::query::Query<'_, Sqlite, SqliteArguments<'_>> {
    let mut query = sqlx::query(sql);
    for bind in binds {
        query = match bind {
            Bind::Text(v) => query.bind(v),
            Bind::Int(v) => query.bind(v),
        };
    }
    query
}

async fn fetch_assets(conn: &mut SqliteConnection, sql: &str, binds: Vec<Bind>) -> MediaResult<Vec<Asset>> {
    let mut query = sqlx::query_as::<_, AssetRow>(sql);
    for bind in binds {
        query = match bind {
            Bind::Text(v) => query.bind(v),
            Bind::Int(v) => query.bind(v),
        };
    }
    let rows = query.fetch_all(&mut *conn).await?;
    rows.into_iter().map(Asset::try_from).collect()
}

/// `(owner IN .. OR in album IN .. OR id IN ..)` for a visibility scope.
/// Callers must not pass an empty scope.
fn scope_clause(scope: &VisibilityScope, binds: &mut Vec<Bind>) -> String {
    let mut parts = Vec::new();
    if !scope.owner_ids.is_empty() {
        parts.push(format!("owner_id IN ({})", placeholders(scope.owner_ids.len())));
        binds.extend(scope.owner_ids.iter().cloned().map(Bind::Text));
    }
    if !scope.album_ids.is_empty() {
        parts.push(format!(
            "id IN (SELECT asset_id FROM album_assets WHERE album_id IN ({}))",
            placeholders(scope.album_ids.len())
        ));
        binds.extend(scope.album_ids.iter().cloned().map(Bind::Text));
    }
    if !scope.asset_ids.is_empty() {
        parts.push(format!("id IN ({})", placeholders(scope.asset_ids.len())));
        binds.extend(scope.asset_ids.iter().cloned().map(Bind::Text));
    }
    format!("({})", parts.join(" OR "))
}

/// Strictly-after condition on a `(timestamp, id)` column pair
fn after_clause(time_column: &str, id_column: &str, cursor: &Cursor, binds: &mut Vec<Bind>) -> String {
    let at = to_micros(cursor.at);
    binds.push(Bind::Int(at));
    binds.push(Bind::Int(at));
    binds.push(Bind::Text(cursor.id.clone()));
    format!(
        "({t} > ? OR ({t} = ? AND {i} > ?))",
        t = time_column,
        i = id_column
    )
}

async fn insert_asset(conn: &mut SqliteConnection, asset: NewAsset, stamp: DateTime<Utc>) -> MediaResult<Asset> {
    let created = Asset {
        id: Uuid::new_v4().to_string(),
        owner_id: asset.owner_id,
        checksum: asset.checksum,
        kind: asset.kind,
        original_path: asset.original_path,
        original_file_name: asset.original_file_name,
        mime_type: asset.mime_type,
        size_bytes: asset.size_bytes,
        device_asset_id: asset.device_asset_id,
        device_id: asset.device_id,
        file_created_at: asset.file_created_at,
        file_modified_at: asset.file_modified_at,
        is_favorite: asset.is_favorite,
        is_visible: asset.is_visible,
        live_photo_pair_id: asset.live_photo_pair_id,
        sidecar_path: asset.sidecar_path,
        created_at: stamp,
        updated_at: stamp,
        deleted_at: None,
    };

    let inserted = sqlx::query(
        r#"
        INSERT INTO assets (id, owner_id, checksum, kind, original_path, original_file_name,
            mime_type, size_bytes, device_asset_id, device_id, file_created_at,
            file_modified_at, is_favorite, is_visible, live_photo_pair_id, sidecar_path,
            created_at, updated_at, deleted_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?17, NULL)
        "#,
    )
    .bind(&created.id)
    .bind(&created.owner_id)
    .bind(created.checksum.as_bytes())
    .bind(created.kind.as_str())
    .bind(&created.original_path)
    .bind(&created.original_file_name)
    .bind(&created.mime_type)
    .bind(created.size_bytes)
    .bind(&created.device_asset_id)
    .bind(&created.device_id)
    .bind(to_micros(created.file_created_at))
    .bind(to_micros(created.file_modified_at))
    .bind(created.is_favorite)
    .bind(created.is_visible)
    .bind(&created.live_photo_pair_id)
    .bind(&created.sidecar_path)
    .bind(to_micros(stamp))
    .execute(&mut *conn)
    .await;

    match inserted {
        Ok(_) => Ok(created),
        Err(e) if MediaError::is_unique_violation(&e) => Err(MediaError::ChecksumConflict {
            owner_id: created.owner_id,
        }),
        Err(e) => Err(e.into()),
    }
}

/// Write one tombstone per `(user, asset)` pair
pub(crate) async fn insert_tombstones(
    conn: &mut SqliteConnection,
    user_ids: &[String],
    asset_ids: &[String],
    at: DateTime<Utc>,
) -> MediaResult<u64> {
    let mut written = 0;
    for user_id in user_ids {
        for asset_id in asset_ids {
            written += sqlx::query(
                "INSERT OR IGNORE INTO sync_tombstones (user_id, asset_id, removed_at) VALUES (?1, ?2, ?3)",
            )
            .bind(user_id)
            .bind(asset_id)
            .bind(to_micros(at))
            .execute(&mut *conn)
            .await?
            .rows_affected();
        }
    }
    Ok(written)
}

/// Link assets into an album, stamping the ones newly added. Returns the
/// ids that were not already linked.
pub(crate) async fn link_assets(
    conn: &mut SqliteConnection,
    album_id: &str,
    asset_ids: &[String],
    added_by: &str,
    stamp: DateTime<Utc>,
) -> MediaResult<Vec<String>> {
    let mut linked = Vec::new();
    for asset_id in asset_ids {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO album_assets (album_id, asset_id, added_by) VALUES (?1, ?2, ?3)",
        )
        .bind(album_id)
        .bind(asset_id)
        .bind(added_by)
        .execute(&mut *conn)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            sqlx::query("UPDATE assets SET updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL")
                .bind(to_micros(stamp))
                .bind(asset_id)
                .execute(&mut *conn)
                .await?;
            linked.push(asset_id.clone());
        }
    }
    Ok(linked)
}

/// Stamp every non-deleted asset of an album
pub(crate) async fn touch_album_assets(
    conn: &mut SqliteConnection,
    album_id: &str,
    stamp: DateTime<Utc>,
) -> MediaResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE assets SET updated_at = ?1
        WHERE deleted_at IS NULL
          AND id IN (SELECT asset_id FROM album_assets WHERE album_id = ?2)
        "#,
    )
    .bind(to_micros(stamp))
    .bind(album_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

async fn updated_after(
    conn: &mut SqliteConnection,
    scope: &VisibilityScope,
    after: &Cursor,
    limit: u32,
) -> MediaResult<Vec<Asset>> {
    if scope.is_empty() {
        return Ok(Vec::new());
    }
    let mut binds = Vec::new();
    let mut sql = format!(
        "SELECT {} FROM assets WHERE deleted_at IS NULL AND is_visible = 1 AND {}",
        ASSET_COLUMNS,
        scope_clause(scope, &mut binds)
    );
    sql.push_str(" AND ");
    sql.push_str(&after_clause("updated_at", "id", after, &mut binds));
    sql.push_str(" ORDER BY updated_at ASC, id ASC LIMIT ?");
    binds.push(Bind::Int(limit as i64));

    fetch_assets(conn, &sql, binds).await
}

async fn deleted_after(
    conn: &mut SqliteConnection,
    scope: &VisibilityScope,
    after: &Cursor,
    limit: u32,
) -> MediaResult<Vec<Asset>> {
    if scope.is_empty() {
        return Ok(Vec::new());
    }
    let mut binds = Vec::new();
    let mut sql = format!(
        "SELECT {} FROM assets WHERE deleted_at IS NOT NULL AND {}",
        ASSET_COLUMNS,
        scope_clause(scope, &mut binds)
    );
    sql.push_str(" AND ");
    sql.push_str(&after_clause("updated_at", "id", after, &mut binds));
    sql.push_str(" ORDER BY updated_at ASC, id ASC LIMIT ?");
    binds.push(Bind::Int(limit as i64));

    fetch_assets(conn, &sql, binds).await
}

async fn tombstones_after(
    conn: &mut SqliteConnection,
    user_id: &str,
    after: &Cursor,
    limit: u32,
) -> MediaResult<Vec<Tombstone>> {
    let at = to_micros(after.at);
    let rows = sqlx::query(
        r#"
        SELECT user_id, asset_id, removed_at FROM sync_tombstones
        WHERE user_id = ?1 AND (removed_at > ?2 OR (removed_at = ?2 AND asset_id > ?3))
        ORDER BY removed_at ASC, asset_id ASC
        LIMIT ?4
        "#,
    )
    .bind(user_id)
    .bind(at)
    .bind(&after.id)
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|row| -> MediaResult<Tombstone> {
            Ok(Tombstone {
                user_id: row.try_get("user_id")?,
                asset_id: row.try_get("asset_id")?,
                removed_at: db::from_micros(row.try_get("removed_at")?),
            })
        })
        .collect()
}

/// Which of `ids` are currently non-deleted, visible and within scope
async fn visible_ids(
    conn: &mut SqliteConnection,
    scope: &VisibilityScope,
    ids: &[String],
) -> MediaResult<HashSet<String>> {
    if scope.is_empty() || ids.is_empty() {
        return Ok(HashSet::new());
    }
    let mut binds = Vec::new();
    let scope_sql = scope_clause(scope, &mut binds);
    let sql = format!(
        "SELECT id FROM assets WHERE deleted_at IS NULL AND is_visible = 1 AND {} AND id IN ({})",
        scope_sql,
        placeholders(ids.len())
    );
    binds.extend(ids.iter().cloned().map(Bind::Text));

    let mut query = sqlx::query_scalar::<_, String>(&sql);
    for bind in binds {
        query = match bind {
            Bind::Text(v) => query.bind(v),
            Bind::Int(v) => query.bind(v),
        };
    }
    Ok(query.fetch_all(&mut *conn).await?.into_iter().collect())
}

#[async_trait]
impl AssetStore for SqliteAssetStore {
    async fn find_by_id(&self, id: &str) -> MediaResult<Option<Asset>> {
        let sql = format!("SELECT {} FROM assets WHERE id = ?", ASSET_COLUMNS);
        Ok(self.fetch(&sql, vec![Bind::Text(id.to_string())]).await?.pop())
    }

    async fn find_by_ids(&self, ids: &[String]) -> MediaResult<Vec<Asset>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM assets WHERE id IN ({})",
            ASSET_COLUMNS,
            placeholders(ids.len())
        );
        self.fetch(&sql, ids.iter().cloned().map(Bind::Text).collect()).await
    }

    async fn find_by_checksum(&self, owner_id: &str, checksum: &Checksum) -> MediaResult<Option<Asset>> {
        let row = sqlx::query_as::<_, AssetRow>(&format!(
            "SELECT {} FROM assets WHERE owner_id = ?1 AND checksum = ?2 AND deleted_at IS NULL",
            ASSET_COLUMNS
        ))
        .bind(owner_id)
        .bind(checksum.as_bytes())
        .fetch_optional(&self.db)
        .await?;

        row.map(Asset::try_from).transpose()
    }

    async fn find_by_checksums(&self, owner_id: &str, checksums: &[Checksum]) -> MediaResult<Vec<Asset>> {
        if checksums.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM assets WHERE owner_id = ?1 AND deleted_at IS NULL AND checksum IN ({})",
            ASSET_COLUMNS,
            (0..checksums.len())
                .map(|i| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut query = sqlx::query_as::<_, AssetRow>(&sql).bind(owner_id);
        for checksum in checksums {
            query = query.bind(checksum.as_bytes().to_vec());
        }
        let rows = query.fetch_all(&self.db).await?;
        rows.into_iter().map(Asset::try_from).collect()
    }

    async fn create(&self, asset: NewAsset, album_id: Option<&str>) -> MediaResult<Asset> {
        let (mut tx, stamp) = db::begin_stamped(&self.db).await?;

        let created = insert_asset(&mut tx, asset, stamp).await?;
        if let Some(album_id) = album_id {
            link_assets(&mut tx, album_id, &[created.id.clone()], &created.owner_id, stamp).await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn create_paired(&self, video: NewAsset, image_id: &str) -> MediaResult<Asset> {
        let (mut tx, stamp) = db::begin_stamped(&self.db).await?;

        let created = insert_asset(&mut tx, video, stamp).await?;
        let paired = sqlx::query(
            "UPDATE assets SET live_photo_pair_id = ?1, updated_at = ?2 WHERE id = ?3 AND owner_id = ?4",
        )
        .bind(&created.id)
        .bind(to_micros(stamp))
        .bind(image_id)
        .bind(&created.owner_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if paired == 0 {
            return Err(MediaError::NotFound(format!("Live photo image {} not found", image_id)));
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn trash(&self, ids: &[String]) -> MediaResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let (mut tx, stamp) = db::begin_stamped(&self.db).await?;
        let at = to_micros(stamp);
        let list = placeholders(ids.len());

        let mut binds = vec![Bind::Int(at), Bind::Int(at)];
        binds.extend(ids.iter().cloned().map(Bind::Text));
        let trashed = bound(
            &format!(
                "UPDATE assets SET deleted_at = ?, updated_at = ? WHERE deleted_at IS NULL AND id IN ({})",
                list
            ),
            binds,
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        // Hidden videos follow the images that own them
        let mut binds = vec![Bind::Int(at), Bind::Int(at)];
        binds.extend(ids.iter().cloned().map(Bind::Text));
        bound(
            &format!(
                r#"
                UPDATE assets SET deleted_at = ?, updated_at = ?
                WHERE deleted_at IS NULL AND is_visible = 0
                  AND id IN (
                    SELECT image.live_photo_pair_id FROM assets image
                    WHERE image.id IN ({}) AND image.owner_id = assets.owner_id
                  )
                "#,
                list
            ),
            binds,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(trashed)
    }

    async fn restore(&self, ids: &[String]) -> MediaResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let (mut tx, stamp) = db::begin_stamped(&self.db).await?;
        let at = to_micros(stamp);
        let list = placeholders(ids.len());

        let blocked_sql = format!(
            r#"
            SELECT trashed.id FROM assets trashed
            WHERE trashed.id IN ({}) AND trashed.deleted_at IS NOT NULL
              AND EXISTS (
                SELECT 1 FROM assets live
                WHERE live.owner_id = trashed.owner_id AND live.checksum = trashed.checksum
                  AND live.deleted_at IS NULL
              )
            ORDER BY trashed.id
            LIMIT 1
            "#,
            list
        );
        let blocked = sqlx::query_scalar::<_, String>(&blocked_sql);
        let blocked = ids
            .iter()
            .fold(blocked, |query, id| query.bind(id))
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(id) = blocked {
            return Err(MediaError::Validation(format!(
                "Asset {} cannot be restored: an identical file is already in the library",
                id
            )));
        }

        let mut binds = vec![Bind::Int(at)];
        binds.extend(ids.iter().cloned().map(Bind::Text));
        let restored = bound(
            &format!(
                "UPDATE assets SET deleted_at = NULL, updated_at = ? WHERE deleted_at IS NOT NULL AND id IN ({})",
                list
            ),
            binds,
        )
        .execute(&mut *tx)
        .await;
        let restored = match restored {
            Ok(result) => result.rows_affected(),
            Err(e) if MediaError::is_unique_violation(&e) => {
                return Err(MediaError::Validation(
                    "Assets cannot be restored: two of them hold identical files".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        let mut binds = vec![Bind::Int(at)];
        binds.extend(ids.iter().cloned().map(Bind::Text));
        let paired = bound(
            &format!(
                r#"
                UPDATE assets SET deleted_at = NULL, updated_at = ?
                WHERE deleted_at IS NOT NULL
                  AND id IN (
                    SELECT image.live_photo_pair_id FROM assets image
                    WHERE image.id IN ({}) AND image.owner_id = assets.owner_id
                  )
                "#,
                list
            ),
            binds,
        )
        .execute(&mut *tx)
        .await;
        if let Err(e) = paired {
            if MediaError::is_unique_violation(&e) {
                return Err(MediaError::Validation(
                    "Live photo video cannot be restored: an identical file is already in the library"
                        .to_string(),
                ));
            }
            return Err(e.into());
        }

        tx.commit().await?;
        Ok(restored)
    }

    async fn set_live_photo_pair(&self, id: &str, pair_id: &str) -> MediaResult<()> {
        let (mut tx, stamp) = db::begin_stamped(&self.db).await?;
        sqlx::query("UPDATE assets SET live_photo_pair_id = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(pair_id)
            .bind(to_micros(stamp))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_favorite(&self, id: &str, is_favorite: bool) -> MediaResult<bool> {
        let (mut tx, stamp) = db::begin_stamped(&self.db).await?;
        let updated = sqlx::query(
            "UPDATE assets SET is_favorite = ?1, updated_at = ?2 WHERE id = ?3 AND deleted_at IS NULL",
        )
        .bind(is_favorite)
        .bind(to_micros(stamp))
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;
        tx.commit().await?;
        Ok(updated)
    }

    async fn link_to_album(&self, asset_id: &str, album_id: &str, added_by: &str) -> MediaResult<bool> {
        let (mut tx, stamp) = db::begin_stamped(&self.db).await?;
        let linked = link_assets(&mut tx, album_id, &[asset_id.to_string()], added_by, stamp).await?;
        tx.commit().await?;
        Ok(!linked.is_empty())
    }

    async fn search(&self, owner_id: &str, filter: &AssetSearch) -> MediaResult<Vec<Asset>> {
        let mut binds = vec![Bind::Text(owner_id.to_string())];
        let mut sql = format!(
            "SELECT {} FROM assets WHERE owner_id = ? AND deleted_at IS NULL AND is_visible = 1",
            ASSET_COLUMNS
        );
        if let Some(is_favorite) = filter.is_favorite {
            sql.push_str(" AND is_favorite = ?");
            binds.push(Bind::Int(is_favorite as i64));
        }
        if let Some(after) = filter.updated_after {
            sql.push_str(" AND updated_at > ?");
            binds.push(Bind::Int(to_micros(after)));
        }
        if let Some(before) = filter.updated_before {
            sql.push_str(" AND updated_at < ?");
            binds.push(Bind::Int(to_micros(before)));
        }
        sql.push_str(" ORDER BY file_created_at DESC, id DESC LIMIT ? OFFSET ?");
        binds.push(Bind::Int(filter.take as i64));
        binds.push(Bind::Int(filter.skip as i64));

        self.fetch(&sql, binds).await
    }

    async fn library_page(
        &self,
        scope: &VisibilityScope,
        after: Option<&Cursor>,
        until: Option<DateTime<Utc>>,
        limit: u32,
    ) -> MediaResult<LibraryPage> {
        let mut tx = self.db.begin().await?;
        let high_water = db::sync_high_water(&mut tx).await?;

        let assets = if scope.is_empty() {
            Vec::new()
        } else {
            let mut binds = Vec::new();
            let mut sql = format!(
                "SELECT {} FROM assets WHERE deleted_at IS NULL AND is_visible = 1 AND {}",
                ASSET_COLUMNS,
                scope_clause(scope, &mut binds)
            );
            if let Some(after) = after {
                sql.push_str(" AND ");
                sql.push_str(&after_clause("created_at", "id", after, &mut binds));
            }
            if let Some(until) = until {
                sql.push_str(" AND updated_at <= ?");
                binds.push(Bind::Int(to_micros(until)));
            }
            sql.push_str(" ORDER BY created_at ASC, id ASC LIMIT ?");
            binds.push(Bind::Int(limit as i64));
            fetch_assets(&mut tx, &sql, binds).await?
        };

        tx.commit().await?;
        Ok(LibraryPage { assets, high_water })
    }

    async fn changes_since(
        &self,
        scope: &VisibilityScope,
        user_id: &str,
        after: &Cursor,
        limit: u32,
    ) -> MediaResult<ChangeSet> {
        let mut tx = self.db.begin().await?;

        let upserts = updated_after(&mut tx, scope, after, limit).await?;
        let deletions = deleted_after(&mut tx, scope, after, limit).await?;
        let tombstones = tombstones_after(&mut tx, user_id, after, limit).await?;
        let tombstoned: Vec<String> = tombstones.iter().map(|t| t.asset_id.clone()).collect();
        let still_visible = visible_ids(&mut tx, scope, &tombstoned).await?;

        tx.commit().await?;
        Ok(ChangeSet {
            upserts,
            deletions,
            tombstones,
            still_visible,
        })
    }

    async fn prune_tombstones(&self, before: DateTime<Utc>) -> MediaResult<u64> {
        let result = sqlx::query("DELETE FROM sync_tombstones WHERE removed_at < ?1")
            .bind(to_micros(before))
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn existing_device_assets(
        &self,
        owner_id: &str,
        device_id: &str,
        device_asset_ids: &[String],
    ) -> MediaResult<Vec<String>> {
        if device_asset_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT device_asset_id FROM assets
            WHERE owner_id = ? AND device_id = ? AND deleted_at IS NULL
              AND device_asset_id IN ({})
            "#,
            placeholders(device_asset_ids.len())
        );
        let mut query = sqlx::query_scalar::<_, String>(&sql).bind(owner_id).bind(device_id);
        for id in device_asset_ids {
            query = query.bind(id);
        }
        Ok(query.fetch_all(&self.db).await?)
    }

    async fn purge_deleted_before(&self, before: DateTime<Utc>, limit: u32) -> MediaResult<Vec<Asset>> {
        let (mut tx, stamp) = db::begin_stamped(&self.db).await?;

        let expired = fetch_assets(
            &mut tx,
            &format!(
                "SELECT {} FROM assets WHERE deleted_at IS NOT NULL AND deleted_at < ? \
                 ORDER BY deleted_at ASC LIMIT ?",
                ASSET_COLUMNS
            ),
            vec![Bind::Int(to_micros(before)), Bind::Int(limit as i64)],
        )
        .await?;

        for asset in &expired {
            // Pair references are weak
            sqlx::query(
                "UPDATE assets SET live_photo_pair_id = NULL, updated_at = ?1 WHERE live_photo_pair_id = ?2",
            )
            .bind(to_micros(stamp))
            .bind(&asset.id)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM assets WHERE id = ?1")
                .bind(&asset.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::models::AssetKind;
    use chrono::Duration;

    async fn setup() -> (SqlitePool, SqliteAssetStore) {
        let pool = db::create_memory_pool().await.unwrap();
        let store = SqliteAssetStore::new(pool.clone());
        (pool, store)
    }

    fn new_asset(owner: &str, content: &[u8]) -> NewAsset {
        let now = db::now();
        NewAsset {
            owner_id: owner.to_string(),
            checksum: Checksum::of(content),
            kind: AssetKind::Image,
            original_path: format!("{}/blob", owner),
            original_file_name: "IMG_0001.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            size_bytes: content.len() as i64,
            device_asset_id: "device-asset-1".to_string(),
            device_id: "phone".to_string(),
            file_created_at: now,
            file_modified_at: now,
            is_favorite: false,
            is_visible: true,
            live_photo_pair_id: None,
            sidecar_path: None,
        }
    }

    fn owner_scope(owner: &str) -> VisibilityScope {
        VisibilityScope {
            owner_ids: vec![owner.to_string()],
            ..Default::default()
        }
    }

    fn epoch() -> Cursor {
        Cursor::new(db::from_micros(0), "")
    }

    /// Backdate a trashed asset
    async fn set_deleted_at(pool: &SqlitePool, id: &str, at: DateTime<Utc>) {
        sqlx::query("UPDATE assets SET deleted_at = ?1 WHERE id = ?2")
            .bind(to_micros(at))
            .bind(id)
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_and_find_by_checksum() {
        let (_pool, store) = setup().await;
        let created = store.create(new_asset("alice", b"abc123"), None).await.unwrap();

        let found = store
            .find_by_checksum("alice", &Checksum::of(b"abc123"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, created);

        assert!(store
            .find_by_checksum("bob", &Checksum::of(b"abc123"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_checksum_conflicts() {
        let (_pool, store) = setup().await;
        store.create(new_asset("alice", b"abc123"), None).await.unwrap();

        let err = store.create(new_asset("alice", b"abc123"), None).await.unwrap_err();
        assert!(matches!(err, MediaError::ChecksumConflict { .. }));

        // Same bytes for a different owner are a different asset
        store.create(new_asset("bob", b"abc123"), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_writes_are_stamped_in_commit_order() {
        let (_pool, store) = setup().await;
        let mut previous = store.create(new_asset("alice", b"first"), None).await.unwrap();

        // Back-to-back writes never share a key prefix, even within one microsecond
        for i in 0..20u8 {
            let next = store.create(new_asset("alice", &[i]), None).await.unwrap();
            assert!(next.updated_at > previous.updated_at);
            previous = next;
        }

        store.set_favorite(&previous.id, true).await.unwrap();
        let favorite = store.find_by_id(&previous.id).await.unwrap().unwrap();
        assert!(favorite.is_favorite);
        assert!(favorite.updated_at > previous.updated_at);
    }

    #[tokio::test]
    async fn test_soft_deleted_checksum_can_be_reused_but_not_restored() {
        let (_pool, store) = setup().await;
        let first = store.create(new_asset("alice", b"abc123"), None).await.unwrap();
        assert_eq!(store.trash(&[first.id.clone()]).await.unwrap(), 1);
        assert_eq!(store.trash(&[first.id.clone()]).await.unwrap(), 0);

        store.create(new_asset("alice", b"abc123"), None).await.unwrap();

        let err = store.restore(&[first.id.clone()]).await.unwrap_err();
        assert!(matches!(err, MediaError::Validation(_)));
    }

    #[tokio::test]
    async fn test_restore_batch_is_all_or_nothing() {
        let (_pool, store) = setup().await;
        let a = store.create(new_asset("alice", b"aaa"), None).await.unwrap();
        let b = store.create(new_asset("alice", b"bbb"), None).await.unwrap();
        store.trash(&[a.id.clone(), b.id.clone()]).await.unwrap();
        store.create(new_asset("alice", b"bbb"), None).await.unwrap();

        // Both orders, so the outcome cannot depend on which id sorts first
        for ids in [[a.id.clone(), b.id.clone()], [b.id.clone(), a.id.clone()]] {
            let err = store.restore(&ids).await.unwrap_err();
            assert!(err.to_string().contains(&b.id));
            assert!(store.find_by_id(&a.id).await.unwrap().unwrap().is_deleted());
            assert!(store.find_by_id(&b.id).await.unwrap().unwrap().is_deleted());
        }

        assert_eq!(store.restore(&[a.id.clone()]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_trash_and_restore_take_hidden_video_along() {
        let (_pool, store) = setup().await;
        let image = store.create(new_asset("alice", b"still"), None).await.unwrap();
        let mut motion = new_asset("alice", b"motion");
        motion.is_visible = false;
        let video = store.create_paired(motion, &image.id).await.unwrap();

        let image = store.find_by_id(&image.id).await.unwrap().unwrap();
        assert_eq!(image.live_photo_pair_id.as_deref(), Some(video.id.as_str()));
        assert_eq!(image.updated_at, video.updated_at);

        assert_eq!(store.trash(&[image.id.clone()]).await.unwrap(), 1);
        let trashed = store.find_by_id(&video.id).await.unwrap().unwrap();
        assert!(trashed.is_deleted());

        assert_eq!(store.restore(&[image.id.clone()]).await.unwrap(), 1);
        assert!(!store.find_by_id(&video.id).await.unwrap().unwrap().is_deleted());
    }

    #[tokio::test]
    async fn test_create_paired_requires_image_of_same_owner() {
        let (pool, store) = setup().await;
        let image = store.create(new_asset("bob", b"still"), None).await.unwrap();

        let err = store.create_paired(new_asset("alice", b"motion"), &image.id).await.unwrap_err();
        assert!(matches!(err, MediaError::NotFound(_)));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM assets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_changes_since_uses_cursor() {
        let (_pool, store) = setup().await;
        let a = store.create(new_asset("alice", b"one"), None).await.unwrap();
        let b = store.create(new_asset("alice", b"two"), None).await.unwrap();
        let c = store.create(new_asset("alice", b"three"), None).await.unwrap();
        let scope = owner_scope("alice");

        let all = store.changes_since(&scope, "alice", &epoch(), 10).await.unwrap().upserts;
        let ids: Vec<_> = all.iter().map(|asset| asset.id.clone()).collect();
        assert_eq!(ids, vec![a.id.clone(), b.id, c.id]);

        let rest = store
            .changes_since(&scope, "alice", &a.update_cursor(), 10)
            .await
            .unwrap();
        assert_eq!(rest.upserts.len(), 2);

        let capped = store.changes_since(&scope, "alice", &epoch(), 1).await.unwrap();
        assert_eq!(capped.upserts.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_reads_exclude_hidden_and_deleted() {
        let (_pool, store) = setup().await;
        let mut hidden = new_asset("alice", b"motion");
        hidden.is_visible = false;
        store.create(hidden, None).await.unwrap();
        let deleted = store.create(new_asset("alice", b"gone"), None).await.unwrap();
        store.trash(&[deleted.id.clone()]).await.unwrap();
        let kept = store.create(new_asset("alice", b"kept"), None).await.unwrap();

        let scope = owner_scope("alice");
        let page = store.library_page(&scope, None, None, 10).await.unwrap();
        assert_eq!(page.assets.len(), 1);
        assert_eq!(page.assets[0].id, kept.id);
        assert_eq!(page.high_water, kept.updated_at);

        let changes = store.changes_since(&scope, "alice", &epoch(), 10).await.unwrap();
        assert_eq!(changes.deletions.len(), 1);
        assert_eq!(changes.deletions[0].id, deleted.id);
    }

    #[tokio::test]
    async fn test_library_page_bounded_by_updated_until() {
        let (_pool, store) = setup().await;
        let old = store.create(new_asset("alice", b"old"), None).await.unwrap();
        let newer = store.create(new_asset("alice", b"newer"), None).await.unwrap();
        let scope = owner_scope("alice");

        let page = store
            .library_page(&scope, None, Some(old.updated_at), 10)
            .await
            .unwrap();
        assert_eq!(page.assets, vec![old]);
        assert_eq!(page.high_water, newer.updated_at);
    }

    #[tokio::test]
    async fn test_album_scope_and_link() {
        let (pool, store) = setup().await;
        sqlx::query("INSERT INTO albums (id, owner_id, name, created_at, updated_at) VALUES ('album-1', 'alice', 'trip', 0, 0)")
            .execute(&pool)
            .await
            .unwrap();
        store.create(new_asset("alice", b"shared"), Some("album-1")).await.unwrap();
        let later = store.create(new_asset("alice", b"later"), None).await.unwrap();

        let scope = VisibilityScope {
            album_ids: vec!["album-1".to_string()],
            ..Default::default()
        };
        let page = store.library_page(&scope, None, None, 10).await.unwrap();
        assert_eq!(page.assets.len(), 1);

        assert!(store.link_to_album(&later.id, "album-1", "alice").await.unwrap());
        assert!(!store.link_to_album(&later.id, "album-1", "alice").await.unwrap());
        let linked = store.find_by_id(&later.id).await.unwrap().unwrap();
        assert!(linked.updated_at > later.updated_at);
        assert_eq!(store.library_page(&scope, None, None, 10).await.unwrap().assets.len(), 2);
    }

    #[tokio::test]
    async fn test_tombstones_ordered_and_pruned() {
        let (pool, store) = setup().await;
        let t0 = db::now();
        let mut conn = pool.acquire().await.unwrap();
        insert_tombstones(
            &mut *conn,
            &["bob".to_string()],
            &["b".to_string(), "a".to_string()],
            t0,
        )
        .await
        .unwrap();
        drop(conn);

        let nothing = VisibilityScope::default();
        let tombstones = store.changes_since(&nothing, "bob", &epoch(), 10).await.unwrap().tombstones;
        let ids: Vec<_> = tombstones.iter().map(|t| t.asset_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let after_a = tombstones[0].cursor();
        let rest = store.changes_since(&nothing, "bob", &after_a, 10).await.unwrap();
        assert_eq!(rest.tombstones.len(), 1);

        assert_eq!(store.prune_tombstones(t0 + Duration::seconds(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_tombstoned_but_still_visible() {
        let (pool, store) = setup().await;
        let mine = store.create(new_asset("alice", b"mine"), None).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        insert_tombstones(
            &mut *conn,
            &["alice".to_string()],
            &[mine.id.clone(), "gone".to_string()],
            db::now(),
        )
        .await
        .unwrap();
        drop(conn);

        let changes = store
            .changes_since(&owner_scope("alice"), "alice", &epoch(), 10)
            .await
            .unwrap();
        assert_eq!(changes.tombstones.len(), 2);
        assert_eq!(changes.still_visible, HashSet::from([mine.id]));
    }

    #[tokio::test]
    async fn test_search_filters_own_library() {
        let (_pool, store) = setup().await;
        let plain = store.create(new_asset("alice", b"plain"), None).await.unwrap();
        let mut starred = new_asset("alice", b"starred");
        starred.is_favorite = true;
        starred.file_created_at = plain.file_created_at + Duration::days(1);
        let starred = store.create(starred, None).await.unwrap();
        store.create(new_asset("bob", b"theirs"), None).await.unwrap();

        let all = AssetSearch {
            take: 10,
            ..Default::default()
        };
        let ids: Vec<_> = store
            .search("alice", &all)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![starred.id.clone(), plain.id.clone()]);

        let favorites = AssetSearch {
            is_favorite: Some(true),
            take: 10,
            ..Default::default()
        };
        assert_eq!(store.search("alice", &favorites).await.unwrap(), vec![starred.clone()]);

        let since = AssetSearch {
            updated_after: Some(plain.updated_at),
            take: 10,
            ..Default::default()
        };
        assert_eq!(store.search("alice", &since).await.unwrap(), vec![starred]);

        let second_page = AssetSearch {
            skip: 1,
            take: 1,
            ..Default::default()
        };
        assert_eq!(store.search("alice", &second_page).await.unwrap(), vec![plain]);
    }

    #[tokio::test]
    async fn test_existing_device_assets() {
        let (_pool, store) = setup().await;
        store.create(new_asset("alice", b"one"), None).await.unwrap();

        let existing = store
            .existing_device_assets(
                "alice",
                "phone",
                &["device-asset-1".to_string(), "device-asset-2".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(existing, vec!["device-asset-1".to_string()]);

        let other_device = store
            .existing_device_assets("alice", "tablet", &["device-asset-1".to_string()])
            .await
            .unwrap();
        assert!(other_device.is_empty());
    }

    #[tokio::test]
    async fn test_purge_clears_pair_references() {
        let (pool, store) = setup().await;
        let video = store.create(new_asset("alice", b"video"), None).await.unwrap();
        let mut image = new_asset("alice", b"image");
        image.live_photo_pair_id = Some(video.id.clone());
        let image = store.create(image, None).await.unwrap();

        // The video alone, as if the image had been unpaired
        store.trash(&[video.id.clone()]).await.unwrap();
        set_deleted_at(&pool, &video.id, db::now() - Duration::days(40)).await;

        let purged = store.purge_deleted_before(db::now() - Duration::days(30), 100).await.unwrap();
        assert_eq!(purged.len(), 1);
        assert!(store.find_by_id(&video.id).await.unwrap().is_none());

        let unpaired = store.find_by_id(&image.id).await.unwrap().unwrap();
        assert!(unpaired.live_photo_pair_id.is_none());
        assert!(unpaired.updated_at > image.updated_at);
    }
}
