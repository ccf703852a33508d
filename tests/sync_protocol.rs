//! Delta sync against full sync, driven through the public services
use lumen_media::{
    access::{Actor, AlbumRole, Permission},
    album::{AlbumMember, CreateAlbum},
    blob_store::Checksum,
    config::ServerConfig,
    db,
    dedup::{Ingested, UploadFile, UploadMetadata, UploadRequest},
    sync::{FullSyncRequest, SyncCheckpoint},
    AppContext, MediaError,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct Library {
    _dir: TempDir,
    ctx: AppContext,
}

async fn library() -> Library {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::for_data_directory(dir.path().to_path_buf(), "0123456789abcdef0123456789abcdef");
    let pool = db::create_memory_pool().await.unwrap();
    Library {
        ctx: AppContext::with_pool(config, pool),
        _dir: dir,
    }
}

/// A library on a WAL database file, so requests really run side by side
async fn library_on_disk() -> Library {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::for_data_directory(dir.path().to_path_buf(), "0123456789abcdef0123456789abcdef");
    let pool = db::create_pool(&dir.path().join("lumen.db"), db::DatabaseOptions::default())
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    Library {
        ctx: AppContext::with_pool(config, pool),
        _dir: dir,
    }
}

/// Where a client that has just finished a full sync continues from
async fn after_full_sync(ctx: &AppContext, actor: &Actor) -> SyncCheckpoint {
    ctx.sync
        .full_sync(actor, FullSyncRequest::default())
        .await
        .unwrap()
        .checkpoint
}

async fn upload(ctx: &AppContext, actor: &Actor, content: &[u8]) -> Ingested {
    let blob = ctx.blob_store.stage_bytes(content.to_vec()).await.unwrap();
    let now = db::now();
    ctx.dedup
        .ingest(
            actor,
            UploadRequest {
                asset: UploadFile {
                    blob,
                    file_name: "IMG.jpg".to_string(),
                    mime_type: "image/jpeg".to_string(),
                },
                live_photo: None,
                sidecar: None,
                metadata: UploadMetadata {
                    device_asset_id: hex_id(content),
                    device_id: "phone".to_string(),
                    file_created_at: now,
                    file_modified_at: now,
                    is_favorite: false,
                },
                expected_checksum: Some(Checksum::of(content)),
            },
        )
        .await
        .unwrap()
}

fn hex_id(content: &[u8]) -> String {
    Checksum::of(content).to_hex()[..12].to_string()
}

/// Every asset a full sync reports right now
async fn full_state(ctx: &AppContext, actor: &Actor) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    let mut cursor = None;
    loop {
        let page = ctx
            .sync
            .full_sync(
                actor,
                FullSyncRequest {
                    cursor,
                    page_size: Some(2),
                    updated_until: None,
                },
            )
            .await
            .unwrap();
        ids.extend(page.assets.into_iter().map(|a| a.id));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return ids,
        }
    }
}

/// Replay delta sync until drained, applying upserts then deletions
async fn replay(
    ctx: &AppContext,
    actor: &Actor,
    mut checkpoint: SyncCheckpoint,
    state: &mut BTreeSet<String>,
) -> SyncCheckpoint {
    loop {
        let delta = ctx.sync.delta_sync(actor, &checkpoint, Some(2)).await.unwrap();
        assert!(delta.new_checkpoint >= checkpoint);

        for asset in delta.upserted {
            state.insert(asset.id);
        }
        for id in delta.deleted_ids {
            state.remove(&id);
        }
        checkpoint = delta.new_checkpoint;
        if !delta.has_more {
            break;
        }
    }
    checkpoint
}

#[tokio::test]
async fn test_upload_dedup_and_delete_scenario() {
    let lib = library().await;
    let ctx = &lib.ctx;
    let owner = Actor::user("u");
    let before = after_full_sync(ctx, &owner).await;

    let first = upload(ctx, &owner, b"abc123").await;
    assert!(!first.duplicate);
    let again = upload(ctx, &owner, b"abc123").await;
    assert!(again.duplicate);
    assert_eq!(first.asset.id, again.asset.id);

    ctx.assets.delete(&owner, &[first.asset.id.clone()]).await.unwrap();

    let delta = ctx.sync.delta_sync(&owner, &before, None).await.unwrap();
    assert_eq!(delta.deleted_ids, vec![first.asset.id.clone()]);
    assert!(delta.upserted.iter().all(|a| a.id != first.asset.id));
    assert!(!delta.has_more);
}

#[tokio::test]
async fn test_delta_replay_matches_full_sync() {
    let lib = library().await;
    let ctx = &lib.ctx;
    let alice = Actor::user("alice");
    let bob = Actor::user("bob");

    let mut state = BTreeSet::new();
    let mut checkpoint = after_full_sync(ctx, &alice).await;

    // Own uploads
    let a = upload(ctx, &alice, b"a").await.asset;
    let b = upload(ctx, &alice, b"b").await.asset;
    let c = upload(ctx, &alice, b"c").await.asset;
    checkpoint = replay(ctx, &alice, checkpoint, &mut state).await;
    assert_eq!(state, full_state(ctx, &alice).await);
    assert_eq!(state.len(), 3);

    // Trash and restore
    ctx.assets.delete(&alice, &[b.id.clone(), c.id.clone()]).await.unwrap();
    ctx.assets.restore(&alice, &[c.id.clone()]).await.unwrap();
    checkpoint = replay(ctx, &alice, checkpoint, &mut state).await;
    assert_eq!(state, full_state(ctx, &alice).await);
    assert!(!state.contains(&b.id));

    // Bob shares an album with alice
    let d = upload(ctx, &bob, b"d").await.asset;
    let e = upload(ctx, &bob, b"e").await.asset;
    let album = ctx
        .albums
        .create(
            &bob,
            CreateAlbum {
                name: "Trip".to_string(),
                asset_ids: vec![d.id.clone(), e.id.clone()],
                members: vec![],
            },
        )
        .await
        .unwrap();
    let album_id = album.album.id;
    ctx.albums
        .add_member(
            &bob,
            &album_id,
            AlbumMember {
                user_id: "alice".to_string(),
                role: AlbumRole::Viewer,
            },
        )
        .await
        .unwrap();
    checkpoint = replay(ctx, &alice, checkpoint, &mut state).await;
    assert_eq!(state, full_state(ctx, &alice).await);
    assert!(state.contains(&d.id) && state.contains(&e.id));

    // Bob pulls one asset out of the album and trashes the other
    ctx.albums.remove_assets(&bob, &album_id, &[d.id.clone()]).await.unwrap();
    ctx.assets.delete(&bob, &[e.id.clone()]).await.unwrap();
    checkpoint = replay(ctx, &alice, checkpoint, &mut state).await;
    assert_eq!(state, full_state(ctx, &alice).await);
    assert!(!state.contains(&d.id) && !state.contains(&e.id));

    // Alice's own asset in a revoked album stays visible to her
    let f = upload(ctx, &bob, b"f").await.asset;
    ctx.albums.add_assets(&bob, &album_id, &[f.id.clone()]).await.unwrap();
    let shared = ctx
        .albums
        .create(
            &alice,
            CreateAlbum {
                name: "Mine".to_string(),
                asset_ids: vec![a.id.clone()],
                members: vec![AlbumMember {
                    user_id: "bob".to_string(),
                    role: AlbumRole::Viewer,
                }],
            },
        )
        .await
        .unwrap();
    ctx.albums.remove_member(&bob, &album_id, "alice").await.unwrap();
    ctx.albums.delete(&alice, &shared.album.id).await.unwrap();
    checkpoint = replay(ctx, &alice, checkpoint, &mut state).await;
    assert_eq!(state, full_state(ctx, &alice).await);
    assert!(state.contains(&a.id));
    assert!(!state.contains(&f.id));

    // Nothing changed since: the checkpoint comes back unchanged
    let idle = ctx.sync.delta_sync(&alice, &checkpoint, None).await.unwrap();
    assert!(idle.upserted.is_empty() && idle.deleted_ids.is_empty());
    assert!(!idle.has_more);
    assert_eq!(idle.new_checkpoint, checkpoint);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delta_keeps_up_with_concurrent_writers() {
    let lib = library_on_disk().await;
    let ctx = lib.ctx.clone();
    let alice = Actor::user("alice");

    let mut initial = Vec::new();
    for i in 0..12u8 {
        initial.push(upload(&ctx, &alice, &[b'x', i]).await.asset.id);
    }
    let mut state = full_state(&ctx, &alice).await;
    let mut checkpoint = after_full_sync(&ctx, &alice).await;

    let done = Arc::new(AtomicBool::new(false));
    let writers: Vec<_> = (0..3u8)
        .map(|w| {
            let ctx = ctx.clone();
            let alice = alice.clone();
            let mine: Vec<String> = initial.iter().skip(w as usize).step_by(3).cloned().collect();
            tokio::spawn(async move {
                for (i, id) in mine.iter().enumerate() {
                    ctx.assets.delete(&alice, &[id.clone()]).await.unwrap();
                    upload(&ctx, &alice, &[b'y', w, i as u8]).await;
                    if i % 2 == 0 {
                        ctx.assets.restore(&alice, &[id.clone()]).await.unwrap();
                    }
                }
            })
        })
        .collect();

    // A client polling while the writers run
    let reader = {
        let ctx = ctx.clone();
        let alice = alice.clone();
        let done = done.clone();
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                checkpoint = replay(&ctx, &alice, checkpoint, &mut state).await;
                tokio::task::yield_now().await;
            }
            (checkpoint, state)
        })
    };

    for writer in writers {
        writer.await.unwrap();
    }
    done.store(true, Ordering::SeqCst);
    let (checkpoint, mut state) = reader.await.unwrap();

    replay(&ctx, &alice, checkpoint, &mut state).await;
    assert_eq!(state, full_state(&ctx, &alice).await);
}

#[tokio::test]
async fn test_revoked_member_is_denied_immediately() {
    let lib = library().await;
    let ctx = &lib.ctx;
    let bob = Actor::user("bob");
    let alice = Actor::user("alice");

    let asset = upload(ctx, &bob, b"private").await.asset;
    let album = ctx
        .albums
        .create(
            &bob,
            CreateAlbum {
                name: "Trip".to_string(),
                asset_ids: vec![asset.id.clone()],
                members: vec![AlbumMember {
                    user_id: "alice".to_string(),
                    role: AlbumRole::Editor,
                }],
            },
        )
        .await
        .unwrap();

    ctx.oracle
        .require_permission(&alice, Permission::AlbumRead, &album.album.id)
        .await
        .unwrap();

    ctx.albums.remove_member(&bob, &album.album.id, "alice").await.unwrap();

    assert!(matches!(
        ctx.oracle
            .require_permission(&alice, Permission::AlbumRead, &album.album.id)
            .await,
        Err(MediaError::AccessDenied(_))
    ));
    assert!(matches!(
        ctx.assets.get(&alice, &asset.id).await,
        Err(MediaError::AccessDenied(_))
    ));
}

#[tokio::test]
async fn test_stale_checkpoint_requires_full_sync() {
    let lib = library().await;
    let ctx = &lib.ctx;
    let owner = Actor::user("u");

    let ancient = SyncCheckpoint::starting_at(db::now() - ctx.config.sync.tombstone_retention() * 2);
    assert!(matches!(
        ctx.sync.delta_sync(&owner, &ancient, None).await,
        Err(MediaError::StaleCheckpoint)
    ));
}
