/// Application context and dependency injection
use crate::{
    access::{AccessOracle, SqliteAccessRepository},
    activity::{ActivityService, SqliteActivityStore},
    album::{AlbumService, SqliteAlbumStore},
    asset::{AssetService, AssetStore, SqliteAssetStore},
    blob_store::{BlobStore, BlobStoreConfig},
    config::ServerConfig,
    db,
    dedup::{BulkExistenceChecker, DedupGate},
    error::{MediaError, MediaResult},
    rate_limit::RateLimiter,
    shared_link::{SharedLinkService, SharedLinkStore, SqliteSharedLinkStore},
    sync::SyncEngine,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub blob_store: BlobStore,
    pub asset_store: Arc<dyn AssetStore>,
    pub oracle: AccessOracle,
    pub assets: AssetService,
    pub dedup: DedupGate,
    pub existence: BulkExistenceChecker,
    pub sync: SyncEngine,
    pub activities: ActivityService,
    pub albums: AlbumService,
    pub shared_links: SharedLinkService,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> MediaResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create data directories if they don't exist
        Self::ensure_directories(&config).await?;

        let db = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        Ok(Self::with_pool(config, db))
    }

    /// Wire every service on top of an already migrated pool
    pub fn with_pool(config: ServerConfig, db: SqlitePool) -> Self {
        let blob_store = BlobStore::new(BlobStoreConfig {
            location: config.storage.blob_location.clone(),
            staging_location: config.storage.staging_location.clone(),
            max_upload_size: config.service.upload_limit,
        });

        let oracle = AccessOracle::new(Arc::new(SqliteAccessRepository::new(db.clone())));
        let asset_store: Arc<dyn AssetStore> = Arc::new(SqliteAssetStore::new(db.clone()));
        let link_store: Arc<dyn SharedLinkStore> = Arc::new(SqliteSharedLinkStore::new(db.clone()));

        let assets = AssetService::new(oracle.clone(), asset_store.clone(), blob_store.clone());
        let dedup = DedupGate::new(
            oracle.clone(),
            asset_store.clone(),
            blob_store.clone(),
            link_store.clone(),
        );
        let existence = BulkExistenceChecker::new(oracle.clone(), asset_store.clone());
        let sync = SyncEngine::new(oracle.clone(), asset_store.clone(), config.sync.clone());
        let activities = ActivityService::new(
            oracle.clone(),
            Arc::new(SqliteActivityStore::new(db.clone())),
        );
        let albums = AlbumService::new(oracle.clone(), Arc::new(SqliteAlbumStore::new(db.clone())));
        let shared_links = SharedLinkService::new(oracle.clone(), link_store);

        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        Self {
            config: Arc::new(config),
            db,
            blob_store,
            asset_store,
            oracle,
            assets,
            dedup,
            existence,
            sync,
            activities,
            albums,
            shared_links,
            rate_limiter,
        }
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> MediaResult<()> {
        let dirs = [
            &config.storage.data_directory,
            &config.storage.blob_location,
            &config.storage.staging_location,
        ];

        for dir in dirs {
            if !dir.exists() {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    MediaError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
                })?;
            }
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
