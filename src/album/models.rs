/// Album models
use crate::access::AlbumRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub is_activity_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumMember {
    pub user_id: String,
    pub role: AlbumRole,
}

/// Album with its members and contents
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumDetails {
    #[serde(flatten)]
    pub album: Album,
    pub members: Vec<AlbumMember>,
    pub asset_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateAlbum {
    pub name: String,
    pub asset_ids: Vec<String>,
    pub members: Vec<AlbumMember>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateAlbum {
    pub name: Option<String>,
    pub is_activity_enabled: Option<bool>,
}
