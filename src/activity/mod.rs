/// Likes and comments on shared albums
///
/// A like carries no text and is idempotent per `(user, album, asset)`.
/// Comments are never deduplicated.
pub mod models;
pub mod store;

pub use models::{
    Activity, ActivityCreated, ActivitySearch, ActivityStatistics, ActivityType, CreateActivity,
    ReactionLevel,
};
pub use store::{ActivityStore, SqliteActivityStore};

use crate::{
    access::{AccessOracle, Actor, Permission},
    db,
    error::{MediaError, MediaResult},
};
use std::sync::Arc;
use uuid::Uuid;

/// Activity service
#[derive(Clone)]
pub struct ActivityService {
    oracle: AccessOracle,
    store: Arc<dyn ActivityStore>,
}

impl ActivityService {
    pub fn new(oracle: AccessOracle, store: Arc<dyn ActivityStore>) -> Self {
        Self { oracle, store }
    }

    pub async fn get_all(&self, actor: &Actor, filter: &ActivitySearch) -> MediaResult<Vec<Activity>> {
        self.oracle
            .require_permission(actor, Permission::AlbumRead, &filter.album_id)
            .await?;
        // Album-level reactions carry no asset
        if filter.level == Some(ReactionLevel::Album) && filter.asset_id.is_some() {
            let filter = ActivitySearch {
                asset_id: None,
                ..filter.clone()
            };
            return self.store.search(&filter).await;
        }
        self.store.search(filter).await
    }

    pub async fn get_statistics(
        &self,
        actor: &Actor,
        album_id: &str,
        asset_id: Option<&str>,
    ) -> MediaResult<ActivityStatistics> {
        self.oracle
            .require_permission(actor, Permission::AlbumRead, album_id)
            .await?;
        self.store.statistics(album_id, asset_id).await
    }

    pub async fn create(&self, actor: &Actor, request: CreateActivity) -> MediaResult<ActivityCreated> {
        self.oracle
            .require_permission(actor, Permission::ActivityCreate, &request.album_id)
            .await?;

        match self.store.album_activity_enabled(&request.album_id).await? {
            Some(true) => {}
            Some(false) => {
                return Err(MediaError::Validation(
                    "Activity is disabled for this album".to_string(),
                ))
            }
            None => return Err(MediaError::NotFound(request.album_id)),
        }

        if let Some(asset_id) = &request.asset_id {
            if !self.store.album_has_asset(&request.album_id, asset_id).await? {
                return Err(MediaError::Validation(format!(
                    "Asset {} is not in album {}",
                    asset_id, request.album_id
                )));
            }
        }

        if request.is_liked {
            self.like(actor, request).await
        } else {
            self.comment(actor, request).await
        }
    }

    async fn like(&self, actor: &Actor, request: CreateActivity) -> MediaResult<ActivityCreated> {
        let asset_id = request.asset_id.as_deref();
        if let Some(existing) = self.store.find_like(&actor.user_id, &request.album_id, asset_id).await? {
            return Ok(ActivityCreated {
                activity: existing,
                duplicate: true,
            });
        }

        // A like never carries a comment
        let activity = Activity {
            id: Uuid::new_v4().to_string(),
            user_id: actor.user_id.clone(),
            album_id: request.album_id.clone(),
            asset_id: request.asset_id.clone(),
            is_liked: true,
            comment: None,
            created_at: db::now(),
        };

        if self.store.create(&activity).await? {
            return Ok(ActivityCreated {
                activity,
                duplicate: false,
            });
        }

        // Lost a race against an identical like
        let winner = self
            .store
            .find_like(&actor.user_id, &request.album_id, asset_id)
            .await?
            .ok_or_else(|| MediaError::Internal("Conflicting like vanished".to_string()))?;
        Ok(ActivityCreated {
            activity: winner,
            duplicate: true,
        })
    }

    async fn comment(&self, actor: &Actor, request: CreateActivity) -> MediaResult<ActivityCreated> {
        let comment = request
            .comment
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| MediaError::Validation("Comment text is required".to_string()))?
            .to_string();

        let activity = Activity {
            id: Uuid::new_v4().to_string(),
            user_id: actor.user_id.clone(),
            album_id: request.album_id,
            asset_id: request.asset_id,
            is_liked: false,
            comment: Some(comment),
            created_at: db::now(),
        };
        self.store.create(&activity).await?;

        Ok(ActivityCreated {
            activity,
            duplicate: false,
        })
    }

    pub async fn delete(&self, actor: &Actor, activity_id: &str) -> MediaResult<()> {
        self.oracle
            .require_permission(actor, Permission::ActivityDelete, activity_id)
            .await?;
        self.store.delete(activity_id).await?;
        tracing::debug!(activity = %activity_id, user = %actor.user_id, "activity deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AlbumRole, SqliteAccessRepository};
    use sqlx::SqlitePool;

    async fn setup() -> (SqlitePool, ActivityService) {
        let pool = db::create_memory_pool().await.unwrap();
        let oracle = AccessOracle::new(Arc::new(SqliteAccessRepository::new(pool.clone())));
        let service = ActivityService::new(oracle, Arc::new(SqliteActivityStore::new(pool.clone())));

        sqlx::query("INSERT INTO albums (id, owner_id, name, created_at, updated_at) VALUES ('album-1', 'alice', 'trip', 0, 0)")
            .execute(&pool)
            .await
            .unwrap();
        for (user, role) in [("bob", AlbumRole::Editor), ("carol", AlbumRole::Viewer)] {
            sqlx::query("INSERT INTO album_users (album_id, user_id, role) VALUES ('album-1', ?1, ?2)")
                .bind(user)
                .bind(role.as_str())
                .execute(&pool)
                .await
                .unwrap();
        }

        (pool, service)
    }

    fn like() -> CreateActivity {
        CreateActivity {
            album_id: "album-1".to_string(),
            is_liked: true,
            comment: Some("ignored".to_string()),
            ..Default::default()
        }
    }

    fn comment(text: &str) -> CreateActivity {
        CreateActivity {
            album_id: "album-1".to_string(),
            is_liked: false,
            comment: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_like_is_idempotent() {
        let (_pool, service) = setup().await;
        let bob = Actor::user("bob");

        let first = service.create(&bob, like()).await.unwrap();
        let second = service.create(&bob, like()).await.unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.activity.id, second.activity.id);
        assert_eq!(first.activity.comment, None);

        let stats = service.get_statistics(&bob, "album-1", None).await.unwrap();
        assert_eq!(stats, ActivityStatistics { comments: 0, likes: 1 });
    }

    #[tokio::test]
    async fn test_comments_are_not_deduplicated() {
        let (_pool, service) = setup().await;
        let bob = Actor::user("bob");

        let a = service.create(&bob, comment("nice")).await.unwrap();
        let b = service.create(&bob, comment("nice")).await.unwrap();
        assert_ne!(a.activity.id, b.activity.id);

        let all = service
            .get_all(
                &bob,
                &ActivitySearch {
                    album_id: "album-1".to_string(),
                    kind: Some(ActivityType::Comment),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_comment_rejected() {
        let (_pool, service) = setup().await;
        let result = service.create(&Actor::user("bob"), comment("   ")).await;
        assert!(matches!(result, Err(MediaError::Validation(_))));
    }

    #[tokio::test]
    async fn test_viewer_reads_but_cannot_react() {
        let (_pool, service) = setup().await;
        let carol = Actor::user("carol");

        let result = service.create(&carol, like()).await;
        assert!(matches!(result, Err(MediaError::AccessDenied(_))));
        assert!(service.get_statistics(&carol, "album-1", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_activity_rejected() {
        let (pool, service) = setup().await;
        sqlx::query("UPDATE albums SET is_activity_enabled = 0 WHERE id = 'album-1'")
            .execute(&pool)
            .await
            .unwrap();

        let result = service.create(&Actor::user("alice"), like()).await;
        assert!(matches!(result, Err(MediaError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let (_pool, service) = setup().await;
        let bob = Actor::user("bob");
        let created = service.create(&bob, comment("mine")).await.unwrap();

        // A viewer cannot remove someone else's comment
        let result = service.delete(&Actor::user("carol"), &created.activity.id).await;
        assert!(matches!(result, Err(MediaError::AccessDenied(_))));

        // The album owner can
        service.delete(&Actor::user("alice"), &created.activity.id).await.unwrap();

        let result = service.delete(&bob, &created.activity.id).await;
        assert!(matches!(result, Err(MediaError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_album_level_search_ignores_asset() {
        let (_pool, service) = setup().await;
        let bob = Actor::user("bob");
        let created = service.create(&bob, comment("whole trip")).await.unwrap();

        let search = |level| ActivitySearch {
            album_id: "album-1".to_string(),
            asset_id: Some("asset-1".to_string()),
            level: Some(level),
            ..Default::default()
        };

        let album_level = service.get_all(&bob, &search(ReactionLevel::Album)).await.unwrap();
        assert_eq!(album_level, vec![created.activity]);

        let asset_level = service.get_all(&bob, &search(ReactionLevel::Asset)).await.unwrap();
        assert!(asset_level.is_empty());
    }
}
