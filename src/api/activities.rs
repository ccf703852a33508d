/// Album likes and comments
use crate::{
    activity::{Activity, ActivitySearch, ActivityStatistics, ActivityType, CreateActivity},
    api::validated,
    auth::AuthContext,
    context::AppContext,
    error::MediaResult,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

/// Build activity routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/activities", get(get_activities).post(create_activity))
        .route("/api/activities/statistics", get(get_statistics))
        .route("/api/activities/:id", delete(delete_activity))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateActivityRequest {
    #[validate(length(min = 1))]
    pub album_id: String,
    pub asset_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    #[validate(length(max = 10000))]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsParams {
    pub album_id: String,
    pub asset_id: Option<String>,
}

async fn get_activities(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(filter): Query<ActivitySearch>,
) -> MediaResult<Json<Vec<Activity>>> {
    Ok(Json(ctx.activities.get_all(&auth.actor, &filter).await?))
}

/// Create a like or comment; 200 when an identical like already existed
async fn create_activity(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(request): Json<CreateActivityRequest>,
) -> MediaResult<(StatusCode, Json<Activity>)> {
    let request = validated(request)?;
    let created = ctx
        .activities
        .create(
            &auth.actor,
            CreateActivity {
                album_id: request.album_id,
                asset_id: request.asset_id,
                is_liked: request.kind == ActivityType::Like,
                comment: request.comment,
            },
        )
        .await?;

    let status = if created.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(created.activity)))
}

async fn get_statistics(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(params): Query<StatisticsParams>,
) -> MediaResult<Json<ActivityStatistics>> {
    let stats = ctx
        .activities
        .get_statistics(&auth.actor, &params.album_id, params.asset_id.as_deref())
        .await?;
    Ok(Json(stats))
}

async fn delete_activity(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> MediaResult<StatusCode> {
    ctx.activities.delete(&auth.actor, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
