/// Asset upload, browse, download, trash and existence endpoints
use crate::{
    api::validated,
    asset::{Asset, AssetSearch, UpdateAsset},
    auth::AuthContext,
    blob_store::Checksum,
    context::AppContext,
    dedup::{BulkUploadCheckItem, BulkUploadCheckResult, Ingested, UploadFile, UploadMetadata, UploadRequest},
    error::{MediaError, MediaResult},
};
use axum::{
    body::Body,
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use validator::Validate;

/// Header carrying the client's checksum of `assetData`
pub const CHECKSUM_HEADER: &str = "x-asset-checksum";

/// Build asset routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route(
            "/api/assets",
            get(list_assets).post(upload_asset).delete(delete_assets),
        )
        .route("/api/assets/restore", post(restore_assets))
        .route("/api/assets/exist", post(check_existing_assets))
        .route("/api/assets/bulk-upload-check", post(bulk_upload_check))
        .route("/api/assets/exist-by-checksum", post(check_existing_checksums))
        .route("/api/assets/:id", get(get_asset).put(update_asset))
        .route("/api/assets/:id/original", get(download_original))
}

/// Browse filters
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AssetSearchQuery {
    pub is_favorite: Option<bool>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skip: u32,
    #[validate(range(min = 1, max = 1000))]
    pub take: Option<u32>,
}

impl From<AssetSearchQuery> for AssetSearch {
    fn from(query: AssetSearchQuery) -> Self {
        AssetSearch {
            is_favorite: query.is_favorite,
            updated_after: query.updated_after,
            updated_before: query.updated_before,
            skip: query.skip,
            take: query.take.unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssetIdsRequest {
    #[validate(length(min = 1, max = 1000))]
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AffectedResponse {
    pub count: u64,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckExistingAssetsRequest {
    #[validate(length(min = 1))]
    pub device_id: String,
    #[validate(length(max = 10000))]
    pub device_asset_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckExistingAssetsResponse {
    pub existing_ids: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkUploadCheckRequest {
    #[validate(length(max = 10000))]
    pub assets: Vec<BulkUploadCheckItem>,
}

#[derive(Debug, Serialize)]
pub struct BulkUploadCheckResponse {
    pub results: Vec<BulkUploadCheckResult>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckChecksumsRequest {
    #[validate(length(max = 10000))]
    pub checksums: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckChecksumsResponse {
    /// Checksum (as sent) to matching asset id, `null` when absent
    pub results: HashMap<String, Option<String>>,
}

fn multipart_error(e: MultipartError) -> MediaError {
    MediaError::Validation(format!("Malformed upload: {}", e))
}

fn parse_timestamp(field: &str, value: &str) -> MediaResult<DateTime<Utc>> {
    value
        .trim()
        .parse::<DateTime<Utc>>()
        .map_err(|_| MediaError::Validation(format!("{} must be an RFC 3339 timestamp", field)))
}

/// Multipart fields collected before ingest
#[derive(Default)]
struct UploadForm {
    asset: Option<UploadFile>,
    live_photo: Option<UploadFile>,
    sidecar: Option<crate::blob_store::StagedBlob>,
    device_asset_id: Option<String>,
    device_id: Option<String>,
    file_created_at: Option<DateTime<Utc>>,
    file_modified_at: Option<DateTime<Utc>>,
    is_favorite: bool,
}

impl UploadForm {
    fn into_request(self, expected_checksum: Option<Checksum>) -> MediaResult<UploadRequest> {
        let required = |name: &str| MediaError::Validation(format!("Missing field {}", name));

        Ok(UploadRequest {
            asset: self.asset.ok_or_else(|| required("assetData"))?,
            live_photo: self.live_photo,
            sidecar: self.sidecar,
            metadata: UploadMetadata {
                device_asset_id: self.device_asset_id.ok_or_else(|| required("deviceAssetId"))?,
                device_id: self.device_id.ok_or_else(|| required("deviceId"))?,
                file_created_at: self.file_created_at.ok_or_else(|| required("fileCreatedAt"))?,
                file_modified_at: self.file_modified_at.ok_or_else(|| required("fileModifiedAt"))?,
                is_favorite: self.is_favorite,
            },
            expected_checksum,
        })
    }
}

/// Upload an asset
///
/// File parts are streamed straight into staging while hashed; nothing is
/// buffered in memory. Responds 201 for a new asset and 200 when the
/// bytes were already in the target library.
async fn upload_asset(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> MediaResult<(StatusCode, Json<Ingested>)> {
    let expected_checksum = headers
        .get(CHECKSUM_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(Checksum::parse)
        .transpose()?;

    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "assetData" | "livePhotoData" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let blob = ctx.dedup.stage(&auth.actor, field).await?;
                let file = UploadFile {
                    blob,
                    file_name,
                    mime_type,
                };
                if name == "assetData" {
                    form.asset = Some(file);
                } else {
                    form.live_photo = Some(file);
                }
            }
            "sidecarData" => {
                form.sidecar = Some(ctx.dedup.stage(&auth.actor, field).await?);
            }
            "deviceAssetId" => {
                form.device_asset_id = Some(field.text().await.map_err(multipart_error)?);
            }
            "deviceId" => {
                form.device_id = Some(field.text().await.map_err(multipart_error)?);
            }
            "fileCreatedAt" => {
                let value = field.text().await.map_err(multipart_error)?;
                form.file_created_at = Some(parse_timestamp("fileCreatedAt", &value)?);
            }
            "fileModifiedAt" => {
                let value = field.text().await.map_err(multipart_error)?;
                form.file_modified_at = Some(parse_timestamp("fileModifiedAt", &value)?);
            }
            "isFavorite" => {
                let value = field.text().await.map_err(multipart_error)?;
                form.is_favorite = value.trim().eq_ignore_ascii_case("true");
            }
            other => tracing::debug!(field = %other, "ignoring unknown upload field"),
        }
    }

    let ingested = ctx
        .dedup
        .ingest(&auth.actor, form.into_request(expected_checksum)?)
        .await?;

    let status = if ingested.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(ingested)))
}

/// Strong validator for a listing: changes whenever any listed asset does
fn listing_etag(assets: &[Asset]) -> String {
    let mut hasher = Sha256::new();
    for asset in assets {
        hasher.update(asset.id.as_bytes());
        hasher.update(asset.updated_at.timestamp_micros().to_be_bytes());
    }
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

/// Browse the caller's library
///
/// Answers 304 when `If-None-Match` carries the ETag of the same listing.
async fn list_assets(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    headers: HeaderMap,
    Query(query): Query<AssetSearchQuery>,
) -> MediaResult<Response> {
    let query = validated(query)?;
    let assets = ctx.assets.list(&auth.actor, query.into()).await?;

    let etag = listing_etag(&assets);
    let etag_value = HeaderValue::from_str(&etag)
        .map_err(|e| MediaError::Internal(format!("Invalid ETag: {}", e)))?;
    let unchanged = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|tag| tag.trim() == etag))
        .unwrap_or(false);

    let mut response = if unchanged {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        Json(assets).into_response()
    };
    response.headers_mut().insert(header::ETAG, etag_value);
    Ok(response)
}

async fn update_asset(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(request): Json<UpdateAsset>,
) -> MediaResult<Json<Asset>> {
    Ok(Json(ctx.assets.update(&auth.actor, &id, request).await?))
}

async fn get_asset(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> MediaResult<Json<Asset>> {
    Ok(Json(ctx.assets.get(&auth.actor, &id).await?))
}

/// Stream an original file
async fn download_original(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> MediaResult<Response> {
    let file = ctx.assets.open_original(&auth.actor, &id).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        file.file_name.replace(['"', '\\', '\r', '\n'], "_")
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, file.mime_type)
        .header(header::CONTENT_LENGTH, file.size_bytes.to_string())
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CACHE_CONTROL, "private, max-age=86400")
        .body(Body::from_stream(file.stream))
        .map_err(|e| MediaError::Internal(format!("Failed to build response: {}", e)))
}

/// Move assets to the trash
async fn delete_assets(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(request): Json<AssetIdsRequest>,
) -> MediaResult<Json<AffectedResponse>> {
    let request = validated(request)?;
    let count = ctx.assets.delete(&auth.actor, &request.ids).await?;
    Ok(Json(AffectedResponse { count }))
}

/// Restore trashed assets
async fn restore_assets(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(request): Json<AssetIdsRequest>,
) -> MediaResult<Json<AffectedResponse>> {
    let request = validated(request)?;
    let count = ctx.assets.restore(&auth.actor, &request.ids).await?;
    Ok(Json(AffectedResponse { count }))
}

/// Which device asset ids from one device are already backed up
async fn check_existing_assets(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(request): Json<CheckExistingAssetsRequest>,
) -> MediaResult<Json<CheckExistingAssetsResponse>> {
    let request = validated(request)?;
    let existing_ids = ctx
        .existence
        .check_existing_device_assets(&auth.actor, &request.device_id, &request.device_asset_ids)
        .await?;
    Ok(Json(CheckExistingAssetsResponse { existing_ids }))
}

async fn bulk_upload_check(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(request): Json<BulkUploadCheckRequest>,
) -> MediaResult<Json<BulkUploadCheckResponse>> {
    let request = validated(request)?;
    let results = ctx
        .existence
        .bulk_upload_check(&auth.actor, &request.assets)
        .await?;
    Ok(Json(BulkUploadCheckResponse { results }))
}

async fn check_existing_checksums(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Json(request): Json<CheckChecksumsRequest>,
) -> MediaResult<Json<CheckChecksumsResponse>> {
    let request = validated(request)?;
    let parsed = request
        .checksums
        .iter()
        .map(|c| Checksum::parse(c).map(|checksum| (c.clone(), checksum)))
        .collect::<MediaResult<Vec<_>>>()?;
    let checksums: Vec<Checksum> = parsed.iter().map(|(_, c)| *c).collect();

    let found = ctx.existence.check_existing(&auth.actor, &checksums).await?;
    let results = parsed
        .into_iter()
        .map(|(raw, checksum)| (raw, found.get(&checksum).cloned().flatten()))
        .collect();
    Ok(Json(CheckChecksumsResponse { results }))
}
