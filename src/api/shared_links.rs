/// Shared link management
use crate::{
    api::validated,
    auth::AuthContext,
    context::AppContext,
    error::MediaResult,
    shared_link::{CreateSharedLink, SharedLink},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use validator::Validate;

/// Build shared link routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/shared-links", post(create_shared_link))
        .route("/api/shared-links/:id", delete(delete_shared_link))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSharedLinkRequest {
    pub album_id: Option<String>,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub asset_ids: Vec<String>,
    #[serde(default)]
    pub allow_upload: bool,
    #[serde(default = "default_allow_download")]
    pub allow_download: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_allow_download() -> bool {
    true
}

async fn create_shared_link(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(request): Json<CreateSharedLinkRequest>,
) -> MediaResult<(StatusCode, Json<SharedLink>)> {
    let request = validated(request)?;
    let link = ctx
        .shared_links
        .create(
            &auth.actor,
            CreateSharedLink {
                album_id: request.album_id,
                asset_ids: request.asset_ids,
                allow_upload: request.allow_upload,
                allow_download: request.allow_download,
                expires_at: request.expires_at,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(link)))
}

async fn delete_shared_link(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> MediaResult<StatusCode> {
    ctx.shared_links.delete(&auth.actor, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
