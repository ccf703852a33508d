/// Activity models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A like or a comment on an album or one of its assets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub user_id: String,
    pub album_id: String,
    /// `None` targets the album itself
    pub asset_id: Option<String>,
    pub is_liked: bool,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Like,
    Comment,
}

/// Whether an activity targets the album or an asset in it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionLevel {
    Album,
    Asset,
}

/// Search filter; `album_id` is always required
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySearch {
    pub album_id: String,
    pub asset_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<ActivityType>,
    pub level: Option<ReactionLevel>,
}

/// Request to react to an album or asset
#[derive(Debug, Clone, Default)]
pub struct CreateActivity {
    pub album_id: String,
    pub asset_id: Option<String>,
    pub is_liked: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityCreated {
    pub activity: Activity,
    pub duplicate: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStatistics {
    pub comments: i64,
    pub likes: i64,
}
