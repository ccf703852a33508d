/// Access control oracle
///
/// Answers "may this actor perform this permission on this resource" for
/// every core operation. Grants are looked up fresh on every call; nothing is
/// cached, so revocations take effect on the next check.

pub mod grants;
pub mod repository;

pub use grants::{AlbumRole, Grant, SharedLinkGrant};
pub use repository::{AccessRepository, SqliteAccessRepository};

use crate::{
    db,
    error::{MediaError, MediaResult},
    metrics,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// The identity issuing a request.
///
/// For a shared-link request `user_id` is the link creator (new uploads are
/// owned by them) but authority comes from the link alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub shared_link_id: Option<String>,
}

impl Actor {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            shared_link_id: None,
        }
    }

    pub fn shared_link(owner_id: impl Into<String>, link_id: impl Into<String>) -> Self {
        Self {
            user_id: owner_id.into(),
            shared_link_id: Some(link_id.into()),
        }
    }

    pub fn is_shared_link(&self) -> bool {
        self.shared_link_id.is_some()
    }
}

/// Kind of resource a permission is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Asset,
    /// A user's personal library; the resource id is the user id
    Library,
    Album,
    Activity,
    SharedLink,
}

/// Permissions understood by the oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    AssetRead,
    AssetViewOriginal,
    AssetViewThumbnail,
    AssetUpdate,
    AssetShare,
    AssetDelete,
    AssetRestore,
    AssetUpload,
    LibraryRead,
    AlbumRead,
    AlbumUpdate,
    AlbumAddAsset,
    AlbumRemoveAsset,
    AlbumShare,
    AlbumDelete,
    ActivityCreate,
    ActivityDelete,
    SharedLinkCreate,
    SharedLinkDelete,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::AssetRead => "asset.read",
            Permission::AssetViewOriginal => "asset.view-original",
            Permission::AssetViewThumbnail => "asset.view-thumbnail",
            Permission::AssetUpdate => "asset.update",
            Permission::AssetShare => "asset.share",
            Permission::AssetDelete => "asset.delete",
            Permission::AssetRestore => "asset.restore",
            Permission::AssetUpload => "asset.upload",
            Permission::LibraryRead => "library.read",
            Permission::AlbumRead => "album.read",
            Permission::AlbumUpdate => "album.update",
            Permission::AlbumAddAsset => "album.add-asset",
            Permission::AlbumRemoveAsset => "album.remove-asset",
            Permission::AlbumShare => "album.share",
            Permission::AlbumDelete => "album.delete",
            Permission::ActivityCreate => "activity.create",
            Permission::ActivityDelete => "activity.delete",
            Permission::SharedLinkCreate => "shared-link.create",
            Permission::SharedLinkDelete => "shared-link.delete",
        }
    }

    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            Permission::AssetRead
            | Permission::AssetViewOriginal
            | Permission::AssetViewThumbnail
            | Permission::AssetUpdate
            | Permission::AssetShare
            | Permission::AssetDelete
            | Permission::AssetRestore => ResourceKind::Asset,
            Permission::AssetUpload | Permission::LibraryRead => ResourceKind::Library,
            Permission::AlbumRead
            | Permission::AlbumUpdate
            | Permission::AlbumAddAsset
            | Permission::AlbumRemoveAsset
            | Permission::AlbumShare
            | Permission::AlbumDelete
            | Permission::ActivityCreate
            | Permission::SharedLinkCreate => ResourceKind::Album,
            Permission::ActivityDelete => ResourceKind::Activity,
            Permission::SharedLinkDelete => ResourceKind::SharedLink,
        }
    }

    /// Whether a share link may ever grant this permission
    pub fn is_shareable(&self) -> bool {
        matches!(
            self,
            Permission::AssetRead
                | Permission::AssetViewOriginal
                | Permission::AssetViewThumbnail
                | Permission::AssetUpload
                | Permission::AlbumRead
        )
    }

    /// Minimum album role that grants this permission; `None` means only
    /// direct ownership does
    pub fn required_album_role(&self) -> Option<AlbumRole> {
        match self {
            Permission::AssetRead
            | Permission::AssetViewOriginal
            | Permission::AssetViewThumbnail
            | Permission::AlbumRead => Some(AlbumRole::Viewer),
            Permission::AlbumAddAsset
            | Permission::AlbumRemoveAsset
            | Permission::ActivityCreate
            | Permission::ActivityDelete => Some(AlbumRole::Editor),
            Permission::AlbumUpdate | Permission::AlbumShare | Permission::SharedLinkCreate => {
                Some(AlbumRole::Owner)
            }
            Permission::AssetUpdate
            | Permission::AssetShare
            | Permission::AssetDelete
            | Permission::AssetRestore
            | Permission::AssetUpload
            | Permission::LibraryRead
            | Permission::AlbumDelete
            | Permission::SharedLinkDelete => None,
        }
    }
}

/// What an actor can read, expressed for range queries over assets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityScope {
    /// Every asset owned by these users
    pub owner_ids: Vec<String>,
    /// Every asset in these albums
    pub album_ids: Vec<String>,
    /// These explicit assets
    pub asset_ids: Vec<String>,
}

impl VisibilityScope {
    pub fn is_empty(&self) -> bool {
        self.owner_ids.is_empty() && self.album_ids.is_empty() && self.asset_ids.is_empty()
    }
}

/// Where a grant comes from, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GrantSource {
    Ownership,
    SharedLink,
    AlbumMembership,
}

const EVALUATION_ORDER: [GrantSource; 3] = [
    GrantSource::Ownership,
    GrantSource::SharedLink,
    GrantSource::AlbumMembership,
];

/// The access oracle
#[derive(Clone)]
pub struct AccessOracle {
    repository: Arc<dyn AccessRepository>,
}

impl AccessOracle {
    pub fn new(repository: Arc<dyn AccessRepository>) -> Self {
        Self { repository }
    }

    /// Fail with `AccessDenied` (or `NotFound` when the resource does not
    /// exist) unless the actor holds the permission
    pub async fn require_permission(
        &self,
        actor: &Actor,
        permission: Permission,
        resource_id: &str,
    ) -> MediaResult<()> {
        if self.evaluate(actor, permission, resource_id, db::now()).await?.is_some() {
            return Ok(());
        }

        metrics::record_access_denied(permission.as_str());
        tracing::debug!(
            user = %actor.user_id,
            shared_link = ?actor.shared_link_id,
            permission = permission.as_str(),
            resource = resource_id,
            "access denied"
        );

        if self.resource_exists(permission.resource_kind(), resource_id).await? {
            Err(MediaError::AccessDenied(format!(
                "{} on {}",
                permission.as_str(),
                resource_id
            )))
        } else {
            Err(MediaError::NotFound(resource_id.to_string()))
        }
    }

    /// Check every id independently; fail on the first denial
    pub async fn require_permission_many(
        &self,
        actor: &Actor,
        permission: Permission,
        resource_ids: &[String],
    ) -> MediaResult<()> {
        for id in resource_ids {
            self.require_permission(actor, permission, id).await?;
        }
        Ok(())
    }

    /// Subset of `resource_ids` the actor holds the permission on
    pub async fn filter_visible(
        &self,
        actor: &Actor,
        permission: Permission,
        resource_ids: &[String],
    ) -> MediaResult<HashSet<String>> {
        let now = db::now();
        let mut allowed = HashSet::new();
        for id in resource_ids {
            if allowed.contains(id) {
                continue;
            }
            if self.evaluate(actor, permission, id, now).await?.is_some() {
                allowed.insert(id.clone());
            }
        }
        Ok(allowed)
    }

    /// Everything the actor may currently read, for sync range queries
    pub async fn visibility_scope(&self, actor: &Actor) -> MediaResult<VisibilityScope> {
        match &actor.shared_link_id {
            None => Ok(VisibilityScope {
                owner_ids: vec![actor.user_id.clone()],
                album_ids: self.repository.member_album_ids(&actor.user_id).await?,
                asset_ids: Vec::new(),
            }),
            Some(link_id) => {
                let link = match self.repository.shared_link(link_id).await? {
                    Some(link) if !link.is_expired(db::now()) => link,
                    _ => return Ok(VisibilityScope::default()),
                };
                Ok(VisibilityScope {
                    owner_ids: Vec::new(),
                    album_ids: link.album_id.into_iter().collect(),
                    asset_ids: self.repository.shared_link_assets(link_id).await?,
                })
            }
        }
    }

    /// The unexpired share link behind a shared-link actor
    pub async fn shared_link_grant(&self, actor: &Actor) -> MediaResult<Option<SharedLinkGrant>> {
        match &actor.shared_link_id {
            Some(link_id) => Ok(self
                .repository
                .shared_link(link_id)
                .await?
                .filter(|link| !link.is_expired(db::now()))),
            None => Ok(None),
        }
    }

    /// First grant, in precedence order, that allows the permission
    async fn evaluate(
        &self,
        actor: &Actor,
        permission: Permission,
        resource_id: &str,
        now: DateTime<Utc>,
    ) -> MediaResult<Option<Grant>> {
        for source in EVALUATION_ORDER {
            if let Some(grant) = self.lookup(source, actor, permission, resource_id).await? {
                if grant.allows(permission, now) {
                    tracing::trace!(
                        permission = permission.as_str(),
                        resource = resource_id,
                        grant = grant.label(),
                        "access granted"
                    );
                    return Ok(Some(grant));
                }
            }
        }
        Ok(None)
    }

    async fn lookup(
        &self,
        source: GrantSource,
        actor: &Actor,
        permission: Permission,
        resource_id: &str,
    ) -> MediaResult<Option<Grant>> {
        let kind = permission.resource_kind();
        let repo = &self.repository;

        match (source, &actor.shared_link_id) {
            (GrantSource::Ownership, None) => {
                let owner = match kind {
                    ResourceKind::Asset => repo.asset_owner(resource_id).await?,
                    ResourceKind::Library => Some(resource_id.to_string()),
                    ResourceKind::Album => repo.album_owner(resource_id).await?,
                    ResourceKind::Activity => {
                        repo.activity_record(resource_id).await?.map(|(author, _)| author)
                    }
                    ResourceKind::SharedLink => {
                        repo.shared_link(resource_id).await?.map(|link| link.user_id)
                    }
                };
                Ok(owner.filter(|o| *o == actor.user_id).map(|_| Grant::Owner))
            }
            (GrantSource::SharedLink, Some(link_id)) => {
                let link = match repo.shared_link(link_id).await? {
                    Some(link) => link,
                    None => return Ok(None),
                };
                let covers = match kind {
                    ResourceKind::Asset => repo.shared_link_has_asset(link_id, resource_id).await?,
                    ResourceKind::Library => link.user_id == resource_id,
                    ResourceKind::Album => link.album_id.as_deref() == Some(resource_id),
                    ResourceKind::Activity | ResourceKind::SharedLink => false,
                };
                Ok(covers.then(|| Grant::SharedLink(link)))
            }
            (GrantSource::AlbumMembership, None) => {
                let role = match kind {
                    ResourceKind::Asset => repo.asset_album_role(&actor.user_id, resource_id).await?,
                    ResourceKind::Album => repo.album_role(&actor.user_id, resource_id).await?,
                    ResourceKind::Activity => match repo.activity_record(resource_id).await? {
                        Some((_, album_id)) => repo.album_role(&actor.user_id, &album_id).await?,
                        None => None,
                    },
                    ResourceKind::Library | ResourceKind::SharedLink => None,
                };
                Ok(role.map(|role| Grant::AlbumMember { role }))
            }
            // Shared-link actors only hold what the link grants
            _ => Ok(None),
        }
    }

    async fn resource_exists(&self, kind: ResourceKind, resource_id: &str) -> MediaResult<bool> {
        let repo = &self.repository;
        Ok(match kind {
            ResourceKind::Asset => repo.asset_owner(resource_id).await?.is_some(),
            ResourceKind::Library => true,
            ResourceKind::Album => repo.album_owner(resource_id).await?.is_some(),
            ResourceKind::Activity => repo.activity_record(resource_id).await?.is_some(),
            ResourceKind::SharedLink => repo.shared_link(resource_id).await?.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, to_micros};
    use sqlx::SqlitePool;

    async fn setup() -> (SqlitePool, AccessOracle) {
        let pool = db::create_memory_pool().await.unwrap();
        let oracle = AccessOracle::new(Arc::new(SqliteAccessRepository::new(pool.clone())));
        (pool, oracle)
    }

    async fn insert_asset(pool: &SqlitePool, id: &str, owner: &str) {
        let now = to_micros(db::now());
        sqlx::query(
            r#"
            INSERT INTO assets (id, owner_id, checksum, kind, original_path, original_file_name,
                mime_type, size_bytes, device_asset_id, device_id, file_created_at,
                file_modified_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'image', 'x', 'x.jpg', 'image/jpeg', 1, ?1, 'dev', ?4, ?4, ?4, ?4)
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(id.as_bytes().to_vec())
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn insert_album(pool: &SqlitePool, id: &str, owner: &str) {
        let now = to_micros(db::now());
        sqlx::query("INSERT INTO albums (id, owner_id, name, created_at, updated_at) VALUES (?1, ?2, 'a', ?3, ?3)")
            .bind(id)
            .bind(owner)
            .bind(now)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn add_member(pool: &SqlitePool, album: &str, user: &str, role: AlbumRole) {
        sqlx::query("INSERT INTO album_users (album_id, user_id, role) VALUES (?1, ?2, ?3)")
            .bind(album)
            .bind(user)
            .bind(role.as_str())
            .execute(pool)
            .await
            .unwrap();
    }

    async fn add_to_album(pool: &SqlitePool, album: &str, asset: &str) {
        sqlx::query("INSERT INTO album_assets (album_id, asset_id, added_by) VALUES (?1, ?2, 'x')")
            .bind(album)
            .bind(asset)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn insert_link(pool: &SqlitePool, id: &str, owner: &str, album: Option<&str>, expires_at: Option<i64>) {
        sqlx::query(
            r#"
            INSERT INTO shared_links (id, key, user_id, album_id, allow_upload, allow_download, expires_at, created_at)
            VALUES (?1, ?1, ?2, ?3, 1, 1, ?4, 0)
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(album)
        .bind(expires_at)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_owner_can_read_and_delete() {
        let (pool, oracle) = setup().await;
        insert_asset(&pool, "a1", "alice").await;
        let alice = Actor::user("alice");

        oracle.require_permission(&alice, Permission::AssetRead, "a1").await.unwrap();
        oracle.require_permission(&alice, Permission::AssetDelete, "a1").await.unwrap();
    }

    #[tokio::test]
    async fn test_denied_and_missing_are_distinct() {
        let (pool, oracle) = setup().await;
        insert_asset(&pool, "a1", "alice").await;
        let bob = Actor::user("bob");

        let denied = oracle.require_permission(&bob, Permission::AssetRead, "a1").await;
        assert!(matches!(denied, Err(MediaError::AccessDenied(_))));

        let missing = oracle.require_permission(&bob, Permission::AssetRead, "nope").await;
        assert!(matches!(missing, Err(MediaError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_album_viewer_reads_but_cannot_react() {
        let (pool, oracle) = setup().await;
        insert_asset(&pool, "a1", "alice").await;
        insert_album(&pool, "album-1", "alice").await;
        add_to_album(&pool, "album-1", "a1").await;
        add_member(&pool, "album-1", "bob", AlbumRole::Viewer).await;
        let bob = Actor::user("bob");

        oracle.require_permission(&bob, Permission::AssetRead, "a1").await.unwrap();
        oracle.require_permission(&bob, Permission::AlbumRead, "album-1").await.unwrap();
        assert!(oracle.require_permission(&bob, Permission::ActivityCreate, "album-1").await.is_err());
        assert!(oracle.require_permission(&bob, Permission::AssetDelete, "a1").await.is_err());
    }

    #[tokio::test]
    async fn test_revoked_membership_denies_immediately() {
        let (pool, oracle) = setup().await;
        insert_album(&pool, "album-1", "alice").await;
        add_member(&pool, "album-1", "bob", AlbumRole::Editor).await;
        let bob = Actor::user("bob");

        oracle.require_permission(&bob, Permission::AlbumRead, "album-1").await.unwrap();

        sqlx::query("DELETE FROM album_users WHERE album_id = 'album-1' AND user_id = 'bob'")
            .execute(&pool)
            .await
            .unwrap();

        let result = oracle.require_permission(&bob, Permission::AlbumRead, "album-1").await;
        assert!(matches!(result, Err(MediaError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn test_shared_link_scope() {
        let (pool, oracle) = setup().await;
        insert_asset(&pool, "in-album", "alice").await;
        insert_asset(&pool, "outside", "alice").await;
        insert_album(&pool, "album-1", "alice").await;
        add_to_album(&pool, "album-1", "in-album").await;
        insert_link(&pool, "link-1", "alice", Some("album-1"), None).await;
        let guest = Actor::shared_link("alice", "link-1");

        oracle.require_permission(&guest, Permission::AssetRead, "in-album").await.unwrap();
        oracle.require_permission(&guest, Permission::AlbumRead, "album-1").await.unwrap();
        oracle.require_permission(&guest, Permission::AssetUpload, "alice").await.unwrap();

        // The link does not inherit its creator's ownership
        assert!(oracle.require_permission(&guest, Permission::AssetRead, "outside").await.is_err());
        assert!(oracle.require_permission(&guest, Permission::AssetDelete, "in-album").await.is_err());
    }

    #[tokio::test]
    async fn test_expired_shared_link_denied() {
        let (pool, oracle) = setup().await;
        insert_asset(&pool, "a1", "alice").await;
        insert_album(&pool, "album-1", "alice").await;
        add_to_album(&pool, "album-1", "a1").await;
        let past = to_micros(db::now()) - 1_000_000;
        insert_link(&pool, "link-1", "alice", Some("album-1"), Some(past)).await;
        let guest = Actor::shared_link("alice", "link-1");

        assert!(oracle.require_permission(&guest, Permission::AssetRead, "a1").await.is_err());
        assert!(oracle.visibility_scope(&guest).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_check_fails_fast_and_filter_does_not() {
        let (pool, oracle) = setup().await;
        insert_asset(&pool, "mine", "alice").await;
        insert_asset(&pool, "theirs", "bob").await;
        let alice = Actor::user("alice");
        let ids = vec!["mine".to_string(), "theirs".to_string()];

        assert!(oracle.require_permission_many(&alice, Permission::AssetRead, &ids).await.is_err());

        let visible = oracle.filter_visible(&alice, Permission::AssetRead, &ids).await.unwrap();
        assert_eq!(visible, HashSet::from(["mine".to_string()]));
    }

    #[tokio::test]
    async fn test_activity_delete_rules() {
        let (pool, oracle) = setup().await;
        insert_album(&pool, "album-1", "alice").await;
        add_member(&pool, "album-1", "bob", AlbumRole::Viewer).await;
        add_member(&pool, "album-1", "carol", AlbumRole::Editor).await;
        add_member(&pool, "album-1", "dave", AlbumRole::Viewer).await;
        sqlx::query("INSERT INTO activities (id, user_id, album_id, is_liked, created_at) VALUES ('act-1', 'bob', 'album-1', 1, 0)")
            .execute(&pool)
            .await
            .unwrap();

        // author, album owner and editors may delete; other viewers may not
        oracle.require_permission(&Actor::user("bob"), Permission::ActivityDelete, "act-1").await.unwrap();
        oracle.require_permission(&Actor::user("alice"), Permission::ActivityDelete, "act-1").await.unwrap();
        oracle.require_permission(&Actor::user("carol"), Permission::ActivityDelete, "act-1").await.unwrap();
        assert!(oracle.require_permission(&Actor::user("dave"), Permission::ActivityDelete, "act-1").await.is_err());
    }

    #[tokio::test]
    async fn test_visibility_scope_for_user() {
        let (pool, oracle) = setup().await;
        insert_album(&pool, "own", "alice").await;
        insert_album(&pool, "shared", "bob").await;
        add_member(&pool, "shared", "alice", AlbumRole::Viewer).await;

        let mut scope = oracle.visibility_scope(&Actor::user("alice")).await.unwrap();
        scope.album_ids.sort();

        assert_eq!(scope.owner_ids, vec!["alice".to_string()]);
        assert_eq!(scope.album_ids, vec!["own".to_string(), "shared".to_string()]);
    }
}
