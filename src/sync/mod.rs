/// Full and delta synchronization
///
/// Full sync pages through the visible library in `(created_at, id)` order.
/// Delta sync replays changes after a client-held checkpoint in
/// `(updated_at, id)` order, merging three streams by key: upserts of
/// visible assets, soft deletions within scope, and tombstones recorded
/// when the actor lost visibility of an asset.
///
/// Each call reads from a single database snapshot, and sync keys are
/// drawn in commit order, so a checkpoint never passes a write that has
/// not committed yet.
use crate::{
    access::{AccessOracle, Actor, Permission, VisibilityScope},
    asset::{Asset, AssetStore, ChangeSet, Cursor},
    config::SyncConfig,
    db,
    error::{MediaError, MediaResult},
    metrics,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Position in the `(updated_at, id)` order observed by a client
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoint {
    pub updated_at: DateTime<Utc>,
    pub id: String,
}

impl SyncCheckpoint {
    /// Checkpoint preceding every change made at or after `at`
    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            updated_at: db::from_micros(db::to_micros(at)),
            id: String::new(),
        }
    }

    fn cursor(&self) -> Cursor {
        Cursor::new(self.updated_at, self.id.clone())
    }

    fn from_cursor(cursor: Cursor) -> Self {
        Self {
            updated_at: cursor.at,
            id: cursor.id,
        }
    }
}

/// Position in the `(created_at, id)` order of full sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSyncCursor {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

#[derive(Debug, Clone, Default)]
pub struct FullSyncRequest {
    pub cursor: Option<FullSyncCursor>,
    pub page_size: Option<u32>,
    /// Only return assets last updated at or before this instant
    pub updated_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSyncPage {
    pub assets: Vec<Asset>,
    pub next_cursor: Option<FullSyncCursor>,
    /// Where delta sync picks up after this page. Clients keep the one
    /// from the first page of a full sync.
    pub checkpoint: SyncCheckpoint,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaSync {
    pub upserted: Vec<Asset>,
    pub deleted_ids: Vec<String>,
    pub new_checkpoint: SyncCheckpoint,
    pub has_more: bool,
}

enum Change {
    Upsert(Asset),
    Remove(String),
}

/// The sync engine
#[derive(Clone)]
pub struct SyncEngine {
    oracle: AccessOracle,
    assets: Arc<dyn AssetStore>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(oracle: AccessOracle, assets: Arc<dyn AssetStore>, config: SyncConfig) -> Self {
        Self {
            oracle,
            assets,
            config,
        }
    }

    /// Sync is for the actor's own devices; shared links are denied
    async fn scope(&self, actor: &Actor) -> MediaResult<VisibilityScope> {
        self.oracle
            .require_permission(actor, Permission::LibraryRead, &actor.user_id)
            .await?;
        self.oracle.visibility_scope(actor).await
    }

    /// One page of the actor's visible, non-deleted assets
    pub async fn full_sync(&self, actor: &Actor, request: FullSyncRequest) -> MediaResult<FullSyncPage> {
        let scope = self.scope(actor).await?;
        let max = self.config.full_sync_max_page_size;
        let page_size = request.page_size.unwrap_or(max).clamp(1, max);
        let after = request
            .cursor
            .map(|c| Cursor::new(c.created_at, c.id));

        let page = self
            .assets
            .library_page(&scope, after.as_ref(), request.updated_until, page_size)
            .await?;
        let assets = page.assets;

        let next_cursor = if assets.len() == page_size as usize {
            assets.last().map(|a| FullSyncCursor {
                created_at: a.created_at,
                id: a.id.clone(),
            })
        } else {
            None
        };

        // Everything stamped at or below this is either on the page or was
        // excluded by `updated_until`
        let covered = match request.updated_until {
            Some(until) => until.min(page.high_water),
            None => page.high_water,
        };
        let checkpoint = SyncCheckpoint::starting_at(covered + Duration::microseconds(1));

        metrics::record_sync("full");
        tracing::debug!(user = %actor.user_id, count = assets.len(), "full sync page");
        Ok(FullSyncPage {
            assets,
            next_cursor,
            checkpoint,
        })
    }

    /// Changes after `checkpoint`, at most `limit` of them
    pub async fn delta_sync(
        &self,
        actor: &Actor,
        checkpoint: &SyncCheckpoint,
        limit: Option<u32>,
    ) -> MediaResult<DeltaSync> {
        let scope = self.scope(actor).await?;

        let now = db::now();
        if checkpoint.updated_at < now - self.config.tombstone_retention() {
            metrics::record_sync("stale");
            return Err(MediaError::StaleCheckpoint);
        }

        let max = self.config.delta_sync_max_events;
        let limit = limit.unwrap_or(max).clamp(1, max);
        let fetch = limit + 1;
        let after = checkpoint.cursor();

        let ChangeSet {
            upserts,
            deletions,
            tombstones,
            still_visible,
        } = self
            .assets
            .changes_since(&scope, &actor.user_id, &after, fetch)
            .await?;

        // A stream that filled its fetch may hold more events past its last
        // key, so nothing beyond the smallest such key can be emitted yet
        let horizon = [
            (upserts.len(), upserts.last().map(Asset::update_cursor)),
            (deletions.len(), deletions.last().map(Asset::update_cursor)),
            (tombstones.len(), tombstones.last().map(|t| t.cursor())),
        ]
        .into_iter()
        .filter(|(len, _)| *len > limit as usize)
        .filter_map(|(_, last)| last)
        .min();

        let mut changes: Vec<(Cursor, Change)> = Vec::new();
        changes.extend(upserts.into_iter().map(|a| (a.update_cursor(), Change::Upsert(a))));
        changes.extend(
            deletions
                .into_iter()
                .map(|a| (a.update_cursor(), Change::Remove(a.id))),
        );
        changes.extend(
            tombstones
                .into_iter()
                .filter(|t| !still_visible.contains(&t.asset_id))
                .map(|t| (t.cursor(), Change::Remove(t.asset_id))),
        );
        if let Some(horizon) = &horizon {
            changes.retain(|(key, _)| key <= horizon);
        }
        changes.sort_by(|a, b| a.0.cmp(&b.0));

        let has_more = horizon.is_some() || changes.len() > limit as usize;
        changes.truncate(limit as usize);

        let new_checkpoint = match changes.last() {
            Some((key, _)) => SyncCheckpoint::from_cursor(key.clone()),
            // Everything up to the horizon was filtered out
            None => horizon
                .map(SyncCheckpoint::from_cursor)
                .unwrap_or_else(|| checkpoint.clone()),
        };

        let mut upserted = Vec::new();
        let mut deleted_ids = Vec::new();
        let mut seen_deleted = HashSet::new();
        for (_, change) in changes {
            match change {
                Change::Upsert(asset) => upserted.push(asset),
                Change::Remove(id) => {
                    if seen_deleted.insert(id.clone()) {
                        deleted_ids.push(id);
                    }
                }
            }
        }

        metrics::record_sync("delta");
        tracing::debug!(
            user = %actor.user_id,
            upserted = upserted.len(),
            deleted = deleted_ids.len(),
            has_more,
            "delta sync"
        );

        Ok(DeltaSync {
            upserted,
            deleted_ids,
            new_checkpoint,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        access::SqliteAccessRepository,
        asset::{AssetKind, NewAsset, SqliteAssetStore},
        blob_store::Checksum,
    };
    use sqlx::SqlitePool;
    use tempfile::tempdir;

    struct Harness {
        pool: SqlitePool,
        engine: SyncEngine,
        assets: Arc<SqliteAssetStore>,
    }

    async fn setup(config: SyncConfig) -> Harness {
        let pool = db::create_memory_pool().await.unwrap();
        harness(pool, config)
    }

    fn harness(pool: SqlitePool, config: SyncConfig) -> Harness {
        let oracle = AccessOracle::new(Arc::new(SqliteAccessRepository::new(pool.clone())));
        let assets = Arc::new(SqliteAssetStore::new(pool.clone()));
        Harness {
            pool,
            engine: SyncEngine::new(oracle, assets.clone(), config),
            assets,
        }
    }

    fn new_asset(owner: &str, content: &[u8]) -> NewAsset {
        let now = db::now();
        NewAsset {
            owner_id: owner.to_string(),
            checksum: Checksum::of(content),
            kind: AssetKind::Image,
            original_path: "x".to_string(),
            original_file_name: "x.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            size_bytes: content.len() as i64,
            device_asset_id: "1".to_string(),
            device_id: "phone".to_string(),
            file_created_at: now,
            file_modified_at: now,
            is_favorite: false,
            is_visible: true,
            live_photo_pair_id: None,
            sidecar_path: None,
        }
    }

    async fn create(h: &Harness, owner: &str, content: &[u8]) -> Asset {
        h.assets.create(new_asset(owner, content), None).await.unwrap()
    }

    fn recent() -> SyncCheckpoint {
        SyncCheckpoint::starting_at(db::now() - Duration::minutes(1))
    }

    fn ids(assets: &[Asset]) -> Vec<String> {
        assets.iter().map(|a| a.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_full_sync_pages() {
        let h = setup(SyncConfig::default()).await;
        let alice = Actor::user("alice");
        for i in 0..5u8 {
            create(&h, "alice", &[i]).await;
        }
        create(&h, "bob", b"not visible").await;

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = h
                .engine
                .full_sync(
                    &alice,
                    FullSyncRequest {
                        cursor,
                        page_size: Some(2),
                        updated_until: None,
                    },
                )
                .await
                .unwrap();
            seen.extend(page.assets.into_iter().map(|a| a.id));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(seen.len(), 5);
        assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 5);
    }

    #[tokio::test]
    async fn test_full_sync_checkpoint_hands_over_to_delta() {
        let h = setup(SyncConfig::default()).await;
        let alice = Actor::user("alice");
        create(&h, "alice", b"synced").await;

        let page = h.engine.full_sync(&alice, FullSyncRequest::default()).await.unwrap();
        assert_eq!(page.assets.len(), 1);

        let nothing_new = h.engine.delta_sync(&alice, &page.checkpoint, None).await.unwrap();
        assert!(nothing_new.upserted.is_empty());

        let later = create(&h, "alice", b"later").await;
        let delta = h.engine.delta_sync(&alice, &page.checkpoint, None).await.unwrap();
        assert_eq!(ids(&delta.upserted), vec![later.id]);
    }

    #[tokio::test]
    async fn test_full_sync_updated_until() {
        let h = setup(SyncConfig::default()).await;
        let alice = Actor::user("alice");
        let old = create(&h, "alice", b"old").await;
        let newer = create(&h, "alice", b"newer").await;

        let page = h
            .engine
            .full_sync(
                &alice,
                FullSyncRequest {
                    updated_until: Some(old.updated_at),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(ids(&page.assets), vec![old.id.clone()]);
        assert!(page.next_cursor.is_none());

        // What the bound left out arrives through delta instead
        let delta = h.engine.delta_sync(&alice, &page.checkpoint, None).await.unwrap();
        assert_eq!(ids(&delta.upserted), vec![newer.id]);
    }

    #[tokio::test]
    async fn test_empty_delta_returns_input_checkpoint() {
        let h = setup(SyncConfig::default()).await;
        create(&h, "alice", b"old").await;
        let checkpoint = SyncCheckpoint::starting_at(db::now() + Duration::seconds(1));

        let delta = h
            .engine
            .delta_sync(&Actor::user("alice"), &checkpoint, None)
            .await
            .unwrap();

        assert!(delta.upserted.is_empty());
        assert!(delta.deleted_ids.is_empty());
        assert!(!delta.has_more);
        assert_eq!(delta.new_checkpoint, checkpoint);
    }

    #[tokio::test]
    async fn test_stale_checkpoint() {
        let h = setup(SyncConfig::default()).await;
        let old = SyncCheckpoint::starting_at(db::now() - Duration::days(31));

        let result = h.engine.delta_sync(&Actor::user("alice"), &old, None).await;
        assert!(matches!(result, Err(MediaError::StaleCheckpoint)));
    }

    #[tokio::test]
    async fn test_delta_limit_resumes_without_gaps() {
        let h = setup(SyncConfig::default()).await;
        let alice = Actor::user("alice");
        let start = recent();
        let mut created = HashSet::new();
        for i in 0..5u8 {
            created.insert(create(&h, "alice", &[i]).await.id);
        }

        let mut checkpoint = start.clone();
        let mut seen = HashSet::new();
        loop {
            let delta = h.engine.delta_sync(&alice, &checkpoint, Some(2)).await.unwrap();
            assert!(delta.upserted.len() <= 2);
            assert!(delta.new_checkpoint >= checkpoint);
            seen.extend(delta.upserted.into_iter().map(|a| a.id));
            checkpoint = delta.new_checkpoint;
            if !delta.has_more {
                break;
            }
        }

        assert_eq!(seen, created);
    }

    #[tokio::test]
    async fn test_soft_delete_reported_once() {
        let h = setup(SyncConfig::default()).await;
        let alice = Actor::user("alice");
        let start = recent();
        let asset = create(&h, "alice", b"abc123").await;
        h.assets.trash(&[asset.id.clone()]).await.unwrap();

        let delta = h.engine.delta_sync(&alice, &start, None).await.unwrap();
        assert!(delta.upserted.is_empty());
        assert_eq!(delta.deleted_ids, vec![asset.id.clone()]);

        let again = h.engine.delta_sync(&alice, &delta.new_checkpoint, None).await.unwrap();
        assert!(again.deleted_ids.is_empty());
    }

    #[tokio::test]
    async fn test_write_in_flight_during_delta_is_reported_after_commit() {
        let dir = tempdir().unwrap();
        let pool = db::create_pool(&dir.path().join("lumen.db"), db::DatabaseOptions::default())
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();
        let h = harness(pool, SyncConfig::default());
        let alice = Actor::user("alice");
        let start = recent();
        let first = create(&h, "alice", b"first").await;

        // A write that has drawn its stamp but not committed yet
        let (mut tx, stamp) = db::begin_stamped(&h.pool).await.unwrap();
        assert!(stamp > first.updated_at);
        sqlx::query("UPDATE assets SET is_favorite = 1, updated_at = ?1 WHERE id = ?2")
            .bind(db::to_micros(stamp))
            .bind(&first.id)
            .execute(&mut *tx)
            .await
            .unwrap();

        // A second writer queues behind it instead of committing a newer key first
        let store = h.assets.clone();
        let second = tokio::spawn(async move { store.create(new_asset("alice", b"second"), None).await });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!second.is_finished());

        let during = h.engine.delta_sync(&alice, &start, None).await.unwrap();
        assert_eq!(ids(&during.upserted), vec![first.id.clone()]);
        assert!(!during.upserted[0].is_favorite);

        tx.commit().await.unwrap();
        let second = second.await.unwrap().unwrap();
        assert!(second.updated_at > stamp);

        let after = h.engine.delta_sync(&alice, &during.new_checkpoint, None).await.unwrap();
        assert_eq!(ids(&after.upserted), vec![first.id.clone(), second.id]);
        assert!(after.upserted[0].is_favorite);
    }

    #[tokio::test]
    async fn test_tombstone_hidden_while_still_visible() {
        let h = setup(SyncConfig::default()).await;
        let alice = Actor::user("alice");
        let start = recent();
        let asset = create(&h, "alice", b"mine").await;

        // Alice lost an album path to her own asset but still owns it
        let mut conn = h.pool.acquire().await.unwrap();
        crate::asset::store::insert_tombstones(&mut *conn, &["alice".to_string()], &[asset.id.clone()], db::now())
            .await
            .unwrap();
        drop(conn);

        let delta = h.engine.delta_sync(&alice, &start, None).await.unwrap();
        assert!(delta.deleted_ids.is_empty());
        assert_eq!(delta.upserted.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_link_actor_cannot_sync() {
        let h = setup(SyncConfig::default()).await;
        let guest = Actor::shared_link("alice", "link-1");

        let result = h.engine.full_sync(&guest, FullSyncRequest::default()).await;
        assert!(matches!(result, Err(MediaError::AccessDenied(_))));
    }
}
