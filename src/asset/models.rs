/// Asset database models
use crate::{
    blob_store::Checksum,
    db,
    error::{MediaError, MediaResult},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashSet;

/// Asset kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
    Other,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::Video => "video",
            AssetKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> MediaResult<Self> {
        match s {
            "image" => Ok(AssetKind::Image),
            "video" => Ok(AssetKind::Video),
            "other" => Ok(AssetKind::Other),
            _ => Err(MediaError::Validation(format!("Invalid asset kind: {}", s))),
        }
    }

    /// Classify by the declared MIME type
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            AssetKind::Image
        } else if mime_type.starts_with("video/") {
            AssetKind::Video
        } else {
            AssetKind::Other
        }
    }
}

/// A stored asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    pub owner_id: String,
    pub checksum: Checksum,
    #[serde(rename = "type")]
    pub kind: AssetKind,
    #[serde(skip_serializing)]
    pub original_path: String,
    pub original_file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub device_asset_id: String,
    pub device_id: String,
    pub file_created_at: DateTime<Utc>,
    pub file_modified_at: DateTime<Utc>,
    pub is_favorite: bool,
    pub is_visible: bool,
    pub live_photo_pair_id: Option<String>,
    #[serde(skip_serializing)]
    pub sidecar_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Asset {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Position of this asset in the `(updated_at, id)` order
    pub fn update_cursor(&self) -> Cursor {
        Cursor::new(self.updated_at, self.id.clone())
    }

    /// Position of this asset in the `(created_at, id)` order
    pub fn create_cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.id.clone())
    }
}

/// Raw asset row
#[derive(Debug, Clone, FromRow)]
pub struct AssetRow {
    pub id: String,
    pub owner_id: String,
    pub checksum: Vec<u8>,
    pub kind: String,
    pub original_path: String,
    pub original_file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub device_asset_id: String,
    pub device_id: String,
    pub file_created_at: i64,
    pub file_modified_at: i64,
    pub is_favorite: bool,
    pub is_visible: bool,
    pub live_photo_pair_id: Option<String>,
    pub sidecar_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl TryFrom<AssetRow> for Asset {
    type Error = MediaError;

    fn try_from(row: AssetRow) -> MediaResult<Self> {
        Ok(Asset {
            checksum: Checksum::from_bytes(&row.checksum)?,
            kind: AssetKind::parse(&row.kind)?,
            id: row.id,
            owner_id: row.owner_id,
            original_path: row.original_path,
            original_file_name: row.original_file_name,
            mime_type: row.mime_type,
            size_bytes: row.size_bytes,
            device_asset_id: row.device_asset_id,
            device_id: row.device_id,
            file_created_at: db::from_micros(row.file_created_at),
            file_modified_at: db::from_micros(row.file_modified_at),
            is_favorite: row.is_favorite,
            is_visible: row.is_visible,
            live_photo_pair_id: row.live_photo_pair_id,
            sidecar_path: row.sidecar_path,
            created_at: db::from_micros(row.created_at),
            updated_at: db::from_micros(row.updated_at),
            deleted_at: row.deleted_at.map(db::from_micros),
        })
    }
}

/// Fields supplied when creating an asset
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub owner_id: String,
    pub checksum: Checksum,
    pub kind: AssetKind,
    pub original_path: String,
    pub original_file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub device_asset_id: String,
    pub device_id: String,
    pub file_created_at: DateTime<Utc>,
    pub file_modified_at: DateTime<Utc>,
    pub is_favorite: bool,
    pub is_visible: bool,
    pub live_photo_pair_id: Option<String>,
    pub sidecar_path: Option<String>,
}

/// A `(timestamp, id)` position in one of the range orders.
///
/// Ordering is lexicographic: timestamp first, id as tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor {
    pub at: DateTime<Utc>,
    pub id: String,
}

impl Cursor {
    pub fn new(at: DateTime<Utc>, id: impl Into<String>) -> Self {
        Self { at, id: id.into() }
    }
}

/// A recorded loss of visibility for one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    pub user_id: String,
    pub asset_id: String,
    pub removed_at: DateTime<Utc>,
}

impl Tombstone {
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.removed_at, self.asset_id.clone())
    }
}

/// Everything a delta needs after one checkpoint, read from one snapshot.
///
/// Each stream holds at most the requested number of rows in key order.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub upserts: Vec<Asset>,
    pub deletions: Vec<Asset>,
    pub tombstones: Vec<Tombstone>,
    /// Tombstoned ids that are still visible through another path
    pub still_visible: HashSet<String>,
}

/// A page of the library in `(created_at, id)` order
#[derive(Debug, Clone)]
pub struct LibraryPage {
    pub assets: Vec<Asset>,
    /// Highest sync stamp committed in the snapshot the page was read from
    pub high_water: DateTime<Utc>,
}

/// Filters for browsing one's own library
#[derive(Debug, Clone, Default)]
pub struct AssetSearch {
    pub is_favorite: Option<bool>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
    pub skip: u32,
    pub take: u32,
}

/// Mutable asset fields
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAsset {
    pub is_favorite: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_kind_from_mime() {
        assert_eq!(AssetKind::from_mime("image/heic"), AssetKind::Image);
        assert_eq!(AssetKind::from_mime("video/quicktime"), AssetKind::Video);
        assert_eq!(AssetKind::from_mime("application/xml"), AssetKind::Other);
    }

    #[test]
    fn test_cursor_orders_by_time_then_id() {
        let t = db::now();
        let a = Cursor::new(t, "b");
        let b = Cursor::new(t, "c");
        let c = Cursor::new(t + Duration::microseconds(1), "a");

        assert!(a < b);
        assert!(b < c);
        assert!(Cursor::new(t, "") < a);
    }
}
