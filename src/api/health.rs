/// Health, readiness and metrics endpoints
///
/// Liveness only proves the process answers. Readiness additionally checks
/// the database and that the blob and staging directories are reachable.

use crate::{context::AppContext, error::MediaResult, metrics};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: ComponentStatus,
    pub version: String,
    pub checks: Vec<ComponentHealth>,
}

/// Health status of individual component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: ComponentStatus,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Build health check routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health_basic))
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/health/detailed", get(health_detailed))
        .route("/metrics", get(metrics_endpoint))
}

pub async fn health_basic() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn liveness_probe() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "alive",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn readiness_probe(
    State(ctx): State<AppContext>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if let Err(e) = check_database(&ctx).await {
        tracing::warn!(error = %e, "readiness probe failed: database");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    if let Err(e) = check_directory(&ctx.config.storage.blob_location).await {
        tracing::warn!(error = %e, "readiness probe failed: blob storage");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(serde_json::json!({
        "status": "ready",
        "version": env!("CARGO_PKG_VERSION")
    })))
}

/// Per-component health for monitoring
pub async fn health_detailed(State(ctx): State<AppContext>) -> (StatusCode, Json<HealthStatus>) {
    let checks = vec![
        timed("database", ComponentStatus::Unhealthy, check_database(&ctx)).await,
        timed(
            "blob_storage",
            ComponentStatus::Unhealthy,
            check_directory(&ctx.config.storage.blob_location),
        )
        .await,
        // Uploads fail without staging, but reads still work
        timed(
            "staging",
            ComponentStatus::Degraded,
            check_directory(&ctx.config.storage.staging_location),
        )
        .await,
    ];

    let status = overall_status(&checks);
    let code = match status {
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };

    (
        code,
        Json(HealthStatus {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks,
        }),
    )
}

/// Prometheus scrape endpoint
async fn metrics_endpoint() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}

async fn check_database(ctx: &AppContext) -> MediaResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;
    Ok(())
}

async fn check_directory(path: &Path) -> MediaResult<()> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_dir() {
        return Err(crate::error::MediaError::BlobStorage(format!(
            "{:?} is not a directory",
            path
        )));
    }
    Ok(())
}

async fn timed<F>(name: &str, on_failure: ComponentStatus, check: F) -> ComponentHealth
where
    F: std::future::Future<Output = MediaResult<()>>,
{
    let start = Instant::now();
    let result = check.await;
    let response_time_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(()) => ComponentHealth {
            name: name.to_string(),
            status: ComponentStatus::Healthy,
            response_time_ms,
            error: None,
        },
        Err(e) => ComponentHealth {
            name: name.to_string(),
            status: on_failure,
            response_time_ms,
            error: Some(e.to_string()),
        },
    }
}

/// The worst component status
fn overall_status(checks: &[ComponentHealth]) -> ComponentStatus {
    checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(ComponentStatus::Healthy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(status: ComponentStatus) -> ComponentHealth {
        ComponentHealth {
            name: "c".to_string(),
            status,
            response_time_ms: 1,
            error: None,
        }
    }

    #[test]
    fn test_overall_status_is_worst_component() {
        assert_eq!(overall_status(&[]), ComponentStatus::Healthy);
        assert_eq!(
            overall_status(&[component(ComponentStatus::Healthy), component(ComponentStatus::Degraded)]),
            ComponentStatus::Degraded
        );
        assert_eq!(
            overall_status(&[component(ComponentStatus::Unhealthy), component(ComponentStatus::Degraded)]),
            ComponentStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_directory(dir.path()).await.is_ok());
        assert!(check_directory(&dir.path().join("missing")).await.is_err());
    }

    #[test]
    fn test_health_status_serialization() {
        let health = HealthStatus {
            status: ComponentStatus::Healthy,
            version: "0.1.0".to_string(),
            checks: vec![component(ComponentStatus::Healthy)],
        };

        let json = serde_json::to_string(&health).unwrap();
        assert!(json.contains("\"healthy\""));
        assert!(!json.contains("error"));
    }
}
