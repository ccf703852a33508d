/// Unified error types for the Lumen media server
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the media server
#[derive(Error, Debug)]
pub enum MediaError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Authentication errors (missing, invalid or expired credentials)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The actor is known but lacks the permission
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource does not exist or is no longer visible
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another writer stored the same (owner, checksum) first.
    /// Resolved inside the dedup gate and never returned to callers.
    #[error("Checksum conflict for owner {owner_id}")]
    ChecksumConflict { owner_id: String },

    /// Delta sync checkpoint predates the tombstone retention window
    #[error("Checkpoint is older than the retention window; a full sync is required")]
    StaleCheckpoint,

    /// Blob storage errors
    #[error("Blob storage error: {0}")]
    BlobStorage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JWT errors
    #[error("JWT error: {0}")]
    Jwt(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            MediaError::Database(_) => "database",
            MediaError::Authentication(_) => "authentication",
            MediaError::AccessDenied(_) => "access_denied",
            MediaError::Validation(_) => "validation",
            MediaError::NotFound(_) => "not_found",
            MediaError::ChecksumConflict { .. } => "checksum_conflict",
            MediaError::StaleCheckpoint => "stale_checkpoint",
            MediaError::BlobStorage(_) => "blob_storage",
            MediaError::Io(_) => "io",
            MediaError::Jwt(_) => "jwt",
            MediaError::RateLimitExceeded { .. } => "rate_limit",
            MediaError::Internal(_) => "internal",
        }
    }

    /// True when a sqlx error is a UNIQUE constraint violation
    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert MediaError to HTTP response
impl IntoResponse for MediaError {
    fn into_response(self) -> Response {
        crate::metrics::record_error(self.kind());

        let (status, error_code, message) = match self {
            MediaError::Authentication(_) | MediaError::Jwt(_) => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationRequired",
                self.to_string(),
            ),
            MediaError::AccessDenied(_) => (StatusCode::FORBIDDEN, "Forbidden", self.to_string()),
            MediaError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            MediaError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            MediaError::StaleCheckpoint => (
                StatusCode::GONE,
                "StaleCheckpoint",
                self.to_string(),
            ),
            MediaError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimitExceeded",
                "Rate limit exceeded".to_string(),
            ),
            MediaError::Database(_)
            | MediaError::Internal(_)
            | MediaError::Io(_)
            | MediaError::BlobStorage(_)
            | MediaError::ChecksumConflict { .. } => {
                tracing::error!("request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "Internal server error".to_string(), // Don't leak details
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for media server operations
pub type MediaResult<T> = Result<T, MediaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_and_not_found_are_distinct() {
        let denied = MediaError::AccessDenied("asset a1".to_string()).into_response();
        let missing = MediaError::NotFound("asset a1".to_string()).into_response();

        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let response = MediaError::Internal("disk path /secret".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_stale_checkpoint_maps_to_gone() {
        let response = MediaError::StaleCheckpoint.into_response();
        assert_eq!(response.status(), StatusCode::GONE);
    }
}
