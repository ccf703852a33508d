/// Background task implementations
use crate::{context::AppContext, db, error::MediaResult, metrics};
use std::time::Duration;

const PURGE_BATCH: u32 = 500;

/// Staged uploads older than this were abandoned
const STAGING_TTL: Duration = Duration::from_secs(24 * 3600);

/// Health check - verify all systems are operational
pub async fn health_check(ctx: &AppContext) -> MediaResult<()> {
    db::test_connection(&ctx.db).await
}

/// Permanently remove assets that sat in the trash past retention, then
/// release their bytes
pub async fn purge_trash(ctx: &AppContext) -> MediaResult<u64> {
    let before = db::now() - ctx.config.sync.trash_retention();
    let mut purged = 0u64;

    loop {
        let batch = ctx
            .asset_store
            .purge_deleted_before(before, PURGE_BATCH)
            .await?;
        let batch_len = batch.len();

        for asset in batch {
            let locators = std::iter::once(asset.original_path.as_str()).chain(asset.sidecar_path.as_deref());
            for locator in locators {
                // The row is gone; leftover bytes are only wasted space
                if let Err(e) = ctx.blob_store.delete(locator).await {
                    tracing::warn!("Failed to delete blob {} of purged asset {}: {}", locator, asset.id, e);
                }
            }
            tracing::debug!(asset = %asset.id, owner = %asset.owner_id, "asset purged");
        }

        purged += batch_len as u64;
        if batch_len < PURGE_BATCH as usize {
            break;
        }
    }

    metrics::record_purge("assets", purged);
    Ok(purged)
}

/// Drop tombstones older than the retention window; checkpoints that old
/// are already answered with a full-sync request
pub async fn prune_tombstones(ctx: &AppContext) -> MediaResult<u64> {
    let before = db::now() - ctx.config.sync.tombstone_retention();
    let pruned = ctx.asset_store.prune_tombstones(before).await?;
    metrics::record_purge("tombstones", pruned);
    Ok(pruned)
}

/// Remove staged uploads left behind by interrupted requests
pub async fn clean_staging(ctx: &AppContext) -> MediaResult<u64> {
    let removed = ctx.blob_store.cleanup_staging(STAGING_TTL).await?;
    metrics::record_purge("staging", removed);
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        asset::{AssetKind, NewAsset},
        config::ServerConfig,
    };
    use chrono::Duration as ChronoDuration;
    use futures::stream;

    async fn context(dir: &std::path::Path) -> AppContext {
        let config = ServerConfig::for_data_directory(dir.to_path_buf(), "0123456789abcdef0123456789abcdef");
        let pool = db::create_memory_pool().await.unwrap();
        AppContext::with_pool(config, pool)
    }

    async fn stored_asset(ctx: &AppContext, content: &'static [u8]) -> (String, String) {
        let staged = ctx
            .blob_store
            .stage(stream::iter(vec![Ok::<_, std::io::Error>(bytes::Bytes::from_static(content))]))
            .await
            .unwrap();
        let checksum = staged.checksum;
        let locator = ctx.blob_store.persist(staged, "alice").await.unwrap().commit();

        let now = db::now();
        let asset = ctx
            .asset_store
            .create(
                NewAsset {
                    owner_id: "alice".to_string(),
                    checksum,
                    kind: AssetKind::Image,
                    original_path: locator.clone(),
                    original_file_name: "a.jpg".to_string(),
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
                },
                None,
            )
            .await
            .unwrap();
        (asset.id, locator)
    }

    #[tokio::test]
    async fn test_purge_removes_expired_trash_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let (old_id, old_locator) = stored_asset(&ctx, b"old").await;
        let (recent_id, recent_locator) = stored_asset(&ctx, b"recent").await;

        ctx.asset_store.trash(&[old_id.clone(), recent_id.clone()]).await.unwrap();
        let long_ago = db::now() - ctx.config.sync.trash_retention() - ChronoDuration::days(1);
        sqlx::query("UPDATE assets SET deleted_at = ?1 WHERE id = ?2")
            .bind(db::to_micros(long_ago))
            .bind(&old_id)
            .execute(&ctx.db)
            .await
            .unwrap();

        assert_eq!(purge_trash(&ctx).await.unwrap(), 1);

        assert!(ctx.asset_store.find_by_id(&old_id).await.unwrap().is_none());
        assert!(!ctx.blob_store.exists(&old_locator).await.unwrap());
        assert!(ctx.asset_store.find_by_id(&recent_id).await.unwrap().is_some());
        assert!(ctx.blob_store.exists(&recent_locator).await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_and_health() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;

        health_check(&ctx).await.unwrap();
        assert_eq!(prune_tombstones(&ctx).await.unwrap(), 0);
        assert_eq!(clean_staging(&ctx).await.unwrap(), 0);
    }
}
