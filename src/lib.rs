/// Lumen - personal media server
///
/// Content-addressed uploads with per-owner deduplication, shared albums
/// and links gated by a single access oracle, and incremental sync for
/// mobile clients.

pub mod access;
pub mod activity;
pub mod album;
pub mod api;
pub mod asset;
pub mod auth;
pub mod blob_store;
pub mod config;
pub mod context;
pub mod db;
pub mod dedup;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod rate_limit;
pub mod server;
pub mod shared_link;
pub mod sync;

pub use config::ServerConfig;
pub use context::AppContext;
pub use error::{MediaError, MediaResult};
