/// Prometheus metrics for the media server
///
/// Everything registers into the default registry under the `lumen_`
/// namespace and is scraped through `/metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Requests served, labelled by route template rather than raw path
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lumen_http_requests_total",
        "Requests served by route and status",
        &["method", "route", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "lumen_http_request_duration_seconds",
        "Time to produce a response",
        &["method", "route"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
    )
    .unwrap();

    /// Uploads can hold a request open for minutes
    pub static ref HTTP_REQUESTS_ACTIVE: IntGauge = register_int_gauge!(
        "lumen_http_requests_in_flight",
        "Requests currently in flight"
    )
    .unwrap();

    /// `created` or `duplicate`
    pub static ref UPLOADS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lumen_uploads_total",
        "Ingested uploads by outcome",
        &["outcome"]
    )
    .unwrap();

    /// `full`, `delta` or `stale`
    pub static ref SYNC_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lumen_sync_requests_total",
        "Sync calls by kind",
        &["kind"]
    )
    .unwrap();

    pub static ref ACCESS_DENIED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lumen_access_denied_total",
        "Permission checks that found no grant",
        &["permission"]
    )
    .unwrap();

    pub static ref PURGED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lumen_purged_total",
        "Assets, tombstones and staged files removed by maintenance",
        &["kind"]
    )
    .unwrap();

    pub static ref MAINTENANCE_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lumen_maintenance_runs_total",
        "Maintenance job runs by outcome",
        &["job", "outcome"]
    )
    .unwrap();

    pub static ref MAINTENANCE_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "lumen_maintenance_duration_seconds",
        "Maintenance job run time",
        &["job"],
        vec![0.01, 0.1, 1.0, 10.0, 60.0, 600.0]
    )
    .unwrap();

    /// Failed requests by `MediaError` kind
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lumen_errors_total",
        "Requests answered with an error",
        &["kind"]
    )
    .unwrap();
}

/// Text exposition of the default registry
pub fn render_metrics() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_http_request(method: &str, route: &str, status: u16, seconds: f64) {
    let status = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, route, status.as_str()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, route])
        .observe(seconds);
}

pub fn record_upload(outcome: &str) {
    UPLOADS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_sync(kind: &str) {
    SYNC_REQUESTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_access_denied(permission: &str) {
    ACCESS_DENIED_TOTAL.with_label_values(&[permission]).inc();
}

pub fn record_purge(kind: &str, count: u64) {
    PURGED_TOTAL.with_label_values(&[kind]).inc_by(count);
}

/// One run of a scheduled maintenance job
pub fn record_background_job(job: &str, outcome: &str, seconds: f64) {
    MAINTENANCE_RUNS_TOTAL.with_label_values(&[job, outcome]).inc();
    MAINTENANCE_DURATION_SECONDS
        .with_label_values(&[job])
        .observe(seconds);
}

pub fn record_error(kind: &str) {
    ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_request_is_rendered() {
        record_http_request("GET", "/api/assets/:id", 200, 0.05);
        let rendered = render_metrics();
        assert!(rendered.contains("lumen_http_requests_total"));
        assert!(rendered.contains("route=\"/api/assets/:id\""));
    }

    #[test]
    fn test_library_counters() {
        record_upload("duplicate");
        record_sync("delta");
        record_access_denied("asset.read");
        record_purge("tombstones", 3);

        let rendered = render_metrics();
        assert!(rendered.contains("lumen_uploads_total"));
        assert!(rendered.contains("lumen_sync_requests_total"));
        assert!(rendered.contains("lumen_access_denied_total"));
        assert!(rendered.contains("lumen_purged_total"));
    }

    #[test]
    fn test_maintenance_runs() {
        record_background_job("purge_trash", "success", 1.5);
        let rendered = render_metrics();
        assert!(rendered.contains("lumen_maintenance_runs_total"));
        assert!(rendered.contains("lumen_maintenance_duration_seconds"));
    }
}
