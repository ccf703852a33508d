/// Authentication extractors and utilities
use crate::{
    access::Actor,
    context::AppContext,
    error::{MediaError, MediaResult},
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{request::Parts, HeaderMap},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Header carrying a shared-link key
pub const SHARE_KEY_HEADER: &str = "x-share-key";

/// Access token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
struct ShareKeyQuery {
    key: Option<String>,
}

/// Authenticated caller, either a user or a shared link
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub actor: Actor,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = MediaError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        if let Some(token) = extract_bearer_token(&parts.headers) {
            let claims = verify_jwt_token(&token, &state.config.authentication.jwt_secret)?;
            return Ok(AuthContext {
                actor: Actor::user(claims.sub),
            });
        }

        if let Some(key) = extract_share_key(parts) {
            let actor = state.shared_links.resolve_key(&key).await?;
            tracing::debug!(link = ?actor.shared_link_id, "request authenticated by shared link");
            return Ok(AuthContext { actor });
        }

        Err(MediaError::Authentication("Missing credentials".to_string()))
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn extract_share_key(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(SHARE_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    from_header
        .or_else(|| {
            Query::<ShareKeyQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.key)
        })
        .filter(|key| !key.is_empty())
}

/// Issue an access token for a user
pub fn issue_token(user_id: &str, jwt_secret: &str, ttl_seconds: i64) -> MediaResult<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + ttl_seconds,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| MediaError::Jwt(e.to_string()))
}

/// Verify a JWT token with full validation
///
/// This performs:
/// 1. JWT signature verification
/// 2. Expiration checking
/// 3. Claims validation
pub fn verify_jwt_token(token: &str, jwt_secret: &str) -> MediaResult<Claims> {
    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    // Allow some clock skew (5 minutes)
    validation.leeway = 300;

    let data = decode::<Claims>(token, &decoding_key, &validation).map_err(|e| {
        tracing::warn!("JWT verification failed: {}", e);
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                MediaError::Authentication("Token has expired".to_string())
            }
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                MediaError::Authentication("Invalid token signature".to_string())
            }
            _ => MediaError::Authentication(format!("Invalid token: {}", e)),
        }
    })?;

    if data.claims.sub.is_empty() {
        return Err(MediaError::Authentication("Invalid token: empty subject".to_string()));
    }
    Ok(data.claims)
}
