/// Rate Limiting System
use crate::{
    config::RateLimitConfig,
    error::{MediaError, MediaResult},
};
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc};

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn quota(rps: u32, burst: u32, fallback_rps: NonZeroU32, fallback_burst: NonZeroU32) -> Quota {
    Quota::per_second(NonZeroU32::new(rps).unwrap_or(fallback_rps))
        .allow_burst(NonZeroU32::new(burst).unwrap_or(fallback_burst))
}

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    authenticated_rps: u32,
    authenticated: Arc<DirectLimiter>,
    unauthenticated: Arc<DirectLimiter>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let auth_quota = quota(
            config.authenticated_rps,
            config.burst_size,
            NonZeroU32::MIN.saturating_add(99),
            NonZeroU32::MIN.saturating_add(49),
        );
        let unauth_quota = quota(
            config.unauthenticated_rps,
            config.burst_size / 5,
            NonZeroU32::MIN.saturating_add(9),
            NonZeroU32::MIN.saturating_add(9),
        );

        Self {
            enabled: config.enabled,
            authenticated_rps: config.authenticated_rps,
            authenticated: Arc::new(GovernorLimiter::direct(auth_quota)),
            unauthenticated: Arc::new(GovernorLimiter::direct(unauth_quota)),
        }
    }

    /// Check rate limit for a request carrying credentials
    pub fn check_authenticated(&self) -> MediaResult<()> {
        if !self.enabled {
            return Ok(());
        }
        self.authenticated
            .check()
            .map_err(|_| MediaError::RateLimitExceeded {
                retry_after: std::time::Duration::from_secs(1),
            })
    }

    /// Check rate limit for an anonymous request
    pub fn check_unauthenticated(&self) -> MediaResult<()> {
        if !self.enabled {
            return Ok(());
        }
        self.unauthenticated
            .check()
            .map_err(|_| MediaError::RateLimitExceeded {
                retry_after: std::time::Duration::from_secs(1),
            })
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<crate::context::AppContext>,
    request: Request,
    next: Next,
) -> Response {
    // Bearer tokens and share keys both count as credentials
    let has_credentials = request.headers().contains_key("authorization")
        || request.headers().contains_key(crate::auth::SHARE_KEY_HEADER)
        || request
            .uri()
            .query()
            .map(|q| q.split('&').any(|pair| pair.starts_with("key=")))
            .unwrap_or(false);

    let result = if has_credentials {
        ctx.rate_limiter.check_authenticated()
    } else {
        ctx.rate_limiter.check_unauthenticated()
    };

    if let Err(e) = result {
        tracing::debug!(path = %request.uri().path(), "rate limit exceeded");
        return e.into_response();
    }

    let mut response = next.run(request).await;
    if let Ok(limit) = HeaderValue::from_str(&ctx.rate_limiter.authenticated_rps.to_string()) {
        response.headers_mut().insert("X-RateLimit-Limit", limit);
    }
    response
}
