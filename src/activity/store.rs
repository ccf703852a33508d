/// Activity persistence
use crate::{
    activity::models::{Activity, ActivitySearch, ActivityStatistics, ActivityType, ReactionLevel},
    db::{self, to_micros},
    error::{MediaError, MediaResult},
};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

/// Activity repository
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn search(&self, filter: &ActivitySearch) -> MediaResult<Vec<Activity>>;

    /// Insert an activity. Returns false when a like for the same
    /// `(user, album, asset)` already exists.
    async fn create(&self, activity: &Activity) -> MediaResult<bool>;

    async fn find_like(&self, user_id: &str, album_id: &str, asset_id: Option<&str>) -> MediaResult<Option<Activity>>;

    async fn delete(&self, id: &str) -> MediaResult<bool>;

    async fn statistics(&self, album_id: &str, asset_id: Option<&str>) -> MediaResult<ActivityStatistics>;

    /// `None` when the album does not exist
    async fn album_activity_enabled(&self, album_id: &str) -> MediaResult<Option<bool>>;

    async fn album_has_asset(&self, album_id: &str, asset_id: &str) -> MediaResult<bool>;
}

/// SQLite-backed activity store
#[derive(Clone)]
pub struct SqliteActivityStore {
    db: SqlitePool,
}

impl SqliteActivityStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

fn activity_from_row(row: SqliteRow) -> MediaResult<Activity> {
    Ok(Activity {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        album_id: row.try_get("album_id")?,
        asset_id: row.try_get("asset_id")?,
        is_liked: row.try_get("is_liked")?,
        comment: row.try_get("comment")?,
        created_at: db::from_micros(row.try_get("created_at")?),
    })
}

#[async_trait]
impl ActivityStore for SqliteActivityStore {
    async fn search(&self, filter: &ActivitySearch) -> MediaResult<Vec<Activity>> {
        let mut sql = String::from(
            "SELECT id, user_id, album_id, asset_id, is_liked, comment, created_at FROM activities WHERE album_id = ?",
        );
        let mut binds = vec![filter.album_id.clone()];

        if let Some(asset_id) = &filter.asset_id {
            sql.push_str(" AND asset_id = ?");
            binds.push(asset_id.clone());
        }
        if let Some(user_id) = &filter.user_id {
            sql.push_str(" AND user_id = ?");
            binds.push(user_id.clone());
        }
        match filter.kind {
            Some(ActivityType::Like) => sql.push_str(" AND is_liked = 1"),
            Some(ActivityType::Comment) => sql.push_str(" AND is_liked = 0"),
            None => {}
        }
        match filter.level {
            Some(ReactionLevel::Album) => sql.push_str(" AND asset_id IS NULL"),
            Some(ReactionLevel::Asset) => sql.push_str(" AND asset_id IS NOT NULL"),
            None => {}
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.db).await?;
        rows.into_iter().map(activity_from_row).collect()
    }

    async fn create(&self, activity: &Activity) -> MediaResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO activities (id, user_id, album_id, asset_id, is_liked, comment, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&activity.id)
        .bind(&activity.user_id)
        .bind(&activity.album_id)
        .bind(&activity.asset_id)
        .bind(activity.is_liked)
        .bind(&activity.comment)
        .bind(to_micros(activity.created_at))
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if activity.is_liked && MediaError::is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_like(&self, user_id: &str, album_id: &str, asset_id: Option<&str>) -> MediaResult<Option<Activity>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, album_id, asset_id, is_liked, comment, created_at FROM activities
            WHERE user_id = ?1 AND album_id = ?2 AND IFNULL(asset_id, '') = IFNULL(?3, '') AND is_liked = 1
            "#,
        )
        .bind(user_id)
        .bind(album_id)
        .bind(asset_id)
        .fetch_optional(&self.db)
        .await?;
        row.map(activity_from_row).transpose()
    }

    async fn delete(&self, id: &str) -> MediaResult<bool> {
        let result = sqlx::query("DELETE FROM activities WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn statistics(&self, album_id: &str, asset_id: Option<&str>) -> MediaResult<ActivityStatistics> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN is_liked = 0 THEN 1 ELSE 0 END), 0) AS comments,
                COALESCE(SUM(CASE WHEN is_liked = 1 THEN 1 ELSE 0 END), 0) AS likes
            FROM activities
            WHERE album_id = ?1 AND (?2 IS NULL OR asset_id = ?2)
            "#,
        )
        .bind(album_id)
        .bind(asset_id)
        .fetch_one(&self.db)
        .await?;

        Ok(ActivityStatistics {
            comments: row.try_get("comments")?,
            likes: row.try_get("likes")?,
        })
    }

    async fn album_activity_enabled(&self, album_id: &str) -> MediaResult<Option<bool>> {
        let enabled = sqlx::query_scalar("SELECT is_activity_enabled FROM albums WHERE id = ?1")
            .bind(album_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(enabled)
    }

    async fn album_has_asset(&self, album_id: &str, asset_id: &str) -> MediaResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM album_assets WHERE album_id = ?1 AND asset_id = ?2",
        )
        .bind(album_id)
        .bind(asset_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(found.is_some())
    }
}
