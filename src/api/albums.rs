/// Shared album management
use crate::{
    album::{Album, AlbumDetails, AlbumMember, CreateAlbum, UpdateAlbum},
    api::validated,
    auth::AuthContext,
    context::AppContext,
    error::MediaResult,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Build album routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/albums", post(create_album))
        .route(
            "/api/albums/:id",
            get(get_album).patch(update_album).delete(delete_album),
        )
        .route(
            "/api/albums/:id/assets",
            put(add_assets).delete(remove_assets),
        )
        .route("/api/albums/:id/users", put(add_users))
        .route("/api/albums/:id/users/:user_id", delete(remove_user))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlbumRequest {
    #[validate(length(min = 1, max = 255))]
    pub album_name: String,
    #[serde(default)]
    pub asset_ids: Vec<String>,
    #[serde(default)]
    pub album_users: Vec<AlbumMember>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAlbumRequest {
    #[validate(length(min = 1, max = 255))]
    pub album_name: Option<String>,
    pub is_activity_enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AlbumAssetsRequest {
    #[validate(length(min = 1, max = 1000))]
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AlbumAssetsResponse {
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddUsersRequest {
    #[validate(length(min = 1))]
    pub album_users: Vec<AlbumMember>,
}

async fn create_album(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(request): Json<CreateAlbumRequest>,
) -> MediaResult<(StatusCode, Json<AlbumDetails>)> {
    let request = validated(request)?;
    let album = ctx
        .albums
        .create(
            &auth.actor,
            CreateAlbum {
                name: request.album_name,
                asset_ids: request.asset_ids,
                members: request.album_users,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(album)))
}

async fn get_album(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> MediaResult<Json<AlbumDetails>> {
    Ok(Json(ctx.albums.get(&auth.actor, &id).await?))
}

async fn update_album(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(request): Json<UpdateAlbumRequest>,
) -> MediaResult<Json<Album>> {
    let request = validated(request)?;
    let album = ctx
        .albums
        .update(
            &auth.actor,
            &id,
            UpdateAlbum {
                name: request.album_name,
                is_activity_enabled: request.is_activity_enabled,
            },
        )
        .await?;
    Ok(Json(album))
}

async fn delete_album(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> MediaResult<StatusCode> {
    ctx.albums.delete(&auth.actor, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_assets(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(request): Json<AlbumAssetsRequest>,
) -> MediaResult<Json<AlbumAssetsResponse>> {
    let request = validated(request)?;
    let ids = ctx.albums.add_assets(&auth.actor, &id, &request.ids).await?;
    Ok(Json(AlbumAssetsResponse { ids }))
}

async fn remove_assets(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(request): Json<AlbumAssetsRequest>,
) -> MediaResult<Json<AlbumAssetsResponse>> {
    let request = validated(request)?;
    let ids = ctx.albums.remove_assets(&auth.actor, &id, &request.ids).await?;
    Ok(Json(AlbumAssetsResponse { ids }))
}

async fn add_users(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(request): Json<AddUsersRequest>,
) -> MediaResult<Json<AlbumDetails>> {
    let request = validated(request)?;
    for member in request.album_users {
        ctx.albums.add_member(&auth.actor, &id, member).await?;
    }
    Ok(Json(ctx.albums.get(&auth.actor, &id).await?))
}

/// Revoke a membership; `me` leaves the album
async fn remove_user(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path((id, user_id)): Path<(String, String)>,
) -> MediaResult<StatusCode> {
    let user_id = if user_id == "me" {
        auth.actor.user_id.clone()
    } else {
        user_id
    };
    ctx.albums.remove_member(&auth.actor, &id, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
