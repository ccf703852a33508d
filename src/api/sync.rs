/// Full and delta sync endpoints
use crate::{
    auth::AuthContext,
    context::AppContext,
    error::{MediaError, MediaResult},
    sync::{DeltaSync, FullSyncCursor, FullSyncPage, FullSyncRequest, SyncCheckpoint},
};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Build sync routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/sync/full-sync", get(full_sync))
        .route("/api/sync/delta-sync", get(delta_sync))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSyncParams {
    /// Resume after this `(created_at, id)`; both or neither
    pub created_after: Option<DateTime<Utc>>,
    pub last_id: Option<String>,
    pub limit: Option<u32>,
    pub updated_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaSyncParams {
    pub updated_after: DateTime<Utc>,
    #[serde(default)]
    pub last_id: String,
    pub limit: Option<u32>,
}

/// Delta response; a stale checkpoint asks the client to start over
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaSyncResponse {
    pub needs_full_sync: bool,
    #[serde(flatten)]
    pub delta: Option<DeltaSync>,
}

async fn full_sync(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(params): Query<FullSyncParams>,
) -> MediaResult<Json<FullSyncPage>> {
    let cursor = match (params.created_after, params.last_id) {
        (Some(created_at), Some(id)) => Some(FullSyncCursor { created_at, id }),
        (None, None) => None,
        _ => {
            return Err(MediaError::Validation(
                "createdAfter and lastId must be given together".to_string(),
            ))
        }
    };

    let page = ctx
        .sync
        .full_sync(
            &auth.actor,
            FullSyncRequest {
                cursor,
                page_size: params.limit,
                updated_until: params.updated_until,
            },
        )
        .await?;
    Ok(Json(page))
}

async fn delta_sync(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(params): Query<DeltaSyncParams>,
) -> MediaResult<Json<DeltaSyncResponse>> {
    let checkpoint = SyncCheckpoint {
        updated_at: params.updated_after,
        id: params.last_id,
    };

    match ctx.sync.delta_sync(&auth.actor, &checkpoint, params.limit).await {
        Ok(delta) => Ok(Json(DeltaSyncResponse {
            needs_full_sync: false,
            delta: Some(delta),
        })),
        Err(MediaError::StaleCheckpoint) => {
            tracing::info!(user = %auth.actor.user_id, "stale checkpoint, client must full sync");
            Ok(Json(DeltaSyncResponse {
                needs_full_sync: true,
                delta: None,
            }))
        }
        Err(e) => Err(e),
    }
}
