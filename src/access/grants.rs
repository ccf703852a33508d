/// Grant variants consulted by the access oracle
use crate::access::Permission;
use crate::error::{MediaError, MediaResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Album membership roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlbumRole {
    /// Can see album content
    Viewer,
    /// Can add assets and react
    Editor,
    /// Can manage members and links
    Owner,
}

impl AlbumRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlbumRole::Viewer => "viewer",
            AlbumRole::Editor => "editor",
            AlbumRole::Owner => "owner",
        }
    }

    pub fn parse(s: &str) -> MediaResult<Self> {
        match s.to_lowercase().as_str() {
            "viewer" => Ok(AlbumRole::Viewer),
            "editor" => Ok(AlbumRole::Editor),
            "owner" => Ok(AlbumRole::Owner),
            _ => Err(MediaError::Validation(format!("Invalid album role: {}", s))),
        }
    }

    /// Check if this role can perform actions requiring another role
    pub fn can_act_as(&self, required: AlbumRole) -> bool {
        self >= &required
    }
}

/// Share link record as seen by the oracle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedLinkGrant {
    pub id: String,
    pub user_id: String,
    pub album_id: Option<String>,
    pub allow_upload: bool,
    pub allow_download: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SharedLinkGrant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }
}

/// A reason an actor may hold a permission on a resource.
///
/// Variants are resolved in declaration order by the oracle; each is a plain
/// record plus a pure predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// The actor owns the resource (or its parent album)
    Owner,
    /// A share link whose scope covers the resource
    SharedLink(SharedLinkGrant),
    /// Membership in an album containing the resource
    AlbumMember { role: AlbumRole },
}

impl Grant {
    pub fn allows(&self, permission: Permission, now: DateTime<Utc>) -> bool {
        match self {
            Grant::Owner => true,
            Grant::SharedLink(link) => {
                if link.is_expired(now) || !permission.is_shareable() {
                    return false;
                }
                match permission {
                    Permission::AssetUpload => link.allow_upload,
                    Permission::AssetViewOriginal => link.allow_download,
                    _ => true,
                }
            }
            Grant::AlbumMember { role } => permission
                .required_album_role()
                .map(|required| role.can_act_as(required))
                .unwrap_or(false),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Grant::Owner => "owner",
            Grant::SharedLink(_) => "shared_link",
            Grant::AlbumMember { .. } => "album_member",
        }
    }
}
