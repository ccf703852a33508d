/// Configuration management for the Lumen media server
use crate::error::{MediaError, MediaResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub sync: SyncConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
    /// Largest accepted original, in bytes
    pub upload_limit: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
    /// Permanent location of originals and sidecars
    pub blob_location: PathBuf,
    /// Uploads are streamed here while being hashed
    pub staging_location: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Lifetime of tokens issued by `auth::issue_token`, in seconds
    pub token_ttl: i64,
}

/// Sync and retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How long deletions stay reportable to delta sync, in days
    pub tombstone_retention_days: i64,
    /// How long soft-deleted assets stay restorable before purge, in days
    pub trash_retention_days: i64,
    pub full_sync_max_page_size: u32,
    pub delta_sync_max_events: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tombstone_retention_days: 30,
            trash_retention_days: 30,
            full_sync_max_page_size: 1000,
            delta_sync_max_events: 10_000,
        }
    }
}

impl SyncConfig {
    pub fn tombstone_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.tombstone_retention_days)
    }

    pub fn trash_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.trash_retention_days)
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub authenticated_rps: u32,
    pub unauthenticated_rps: u32,
    pub burst_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> MediaResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("LUMEN_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("LUMEN_PORT")
            .unwrap_or_else(|_| "2283".to_string())
            .parse()
            .map_err(|_| MediaError::Validation("Invalid port number".to_string()))?;
        let version = env::var("LUMEN_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());
        let upload_limit = env_or("LUMEN_UPLOAD_LIMIT", 4 * 1024 * 1024 * 1024u64);

        let data_directory: PathBuf = env::var("LUMEN_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("LUMEN_DATABASE_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("lumen.sqlite"));
        let blob_location = env::var("LUMEN_BLOB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("library"));
        let staging_location = env::var("LUMEN_STAGING_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("upload"));

        let jwt_secret = env::var("LUMEN_JWT_SECRET")
            .map_err(|_| MediaError::Validation("JWT secret required".to_string()))?;
        let token_ttl = env_or("LUMEN_TOKEN_TTL", 7 * 24 * 3600i64);

        let defaults = SyncConfig::default();
        let sync = SyncConfig {
            tombstone_retention_days: env_or(
                "LUMEN_TOMBSTONE_RETENTION_DAYS",
                defaults.tombstone_retention_days,
            ),
            trash_retention_days: env_or(
                "LUMEN_TRASH_RETENTION_DAYS",
                defaults.trash_retention_days,
            ),
            full_sync_max_page_size: env_or(
                "LUMEN_FULL_SYNC_MAX_PAGE_SIZE",
                defaults.full_sync_max_page_size,
            ),
            delta_sync_max_events: env_or(
                "LUMEN_DELTA_SYNC_MAX_EVENTS",
                defaults.delta_sync_max_events,
            ),
        };

        let rate_limit = RateLimitConfig {
            enabled: env_or("LUMEN_RATE_LIMITS_ENABLED", true),
            authenticated_rps: env_or("LUMEN_RATE_LIMIT_AUTHENTICATED_RPS", 100),
            unauthenticated_rps: env_or("LUMEN_RATE_LIMIT_UNAUTHENTICATED_RPS", 10),
            burst_size: env_or("LUMEN_RATE_LIMIT_BURST", 50),
        };

        let logging = LoggingConfig {
            level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            json: env_or("LUMEN_LOG_JSON", false),
        };

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
                upload_limit,
            },
            storage: StorageConfig {
                data_directory,
                database,
                blob_location,
                staging_location,
            },
            authentication: AuthConfig {
                jwt_secret,
                token_ttl,
            },
            sync,
            rate_limit,
            logging,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> MediaResult<()> {
        if self.service.hostname.is_empty() {
            return Err(MediaError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(MediaError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.sync.tombstone_retention_days <= 0 {
            return Err(MediaError::Validation(
                "Tombstone retention must be at least one day".to_string(),
            ));
        }

        // A purged row can no longer be reported as a deletion
        if self.sync.trash_retention_days < self.sync.tombstone_retention_days {
            return Err(MediaError::Validation(
                "Trash retention must be at least the tombstone retention".to_string(),
            ));
        }

        if self.sync.full_sync_max_page_size == 0 || self.sync.delta_sync_max_events == 0 {
            return Err(MediaError::Validation(
                "Sync page sizes must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Configuration rooted in a scratch directory, for tests
    pub fn for_data_directory(data_directory: PathBuf, jwt_secret: &str) -> Self {
        Self {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 0,
                version: env!("CARGO_PKG_VERSION").to_string(),
                upload_limit: 64 * 1024 * 1024,
            },
            storage: StorageConfig {
                database: data_directory.join("lumen.sqlite"),
                blob_location: data_directory.join("library"),
                staging_location: data_directory.join("upload"),
                data_directory,
            },
            authentication: AuthConfig {
                jwt_secret: jwt_secret.to_string(),
                token_ttl: 3600,
            },
            sync: SyncConfig::default(),
            rate_limit: RateLimitConfig {
                enabled: false,
                authenticated_rps: 100,
                unauthenticated_rps: 10,
                burst_size: 50,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
        }
    }
}
