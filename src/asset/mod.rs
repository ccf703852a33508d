/// Asset records, persistence and the trash lifecycle
pub mod models;
pub mod service;
pub mod store;

pub use models::{
    Asset, AssetKind, AssetSearch, ChangeSet, Cursor, LibraryPage, NewAsset, Tombstone, UpdateAsset,
};
pub use service::{AssetService, OriginalFile};
pub use store::{AssetStore, SqliteAssetStore};
