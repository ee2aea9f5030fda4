use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all photo catalog metrics
const PREFIX: &str = "photo_catalog";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "endpoint"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Ingestion Metrics
    pub static ref INGESTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_ingestions_total"), "Uploads processed, by outcome"),
        &["outcome"]
    ).expect("Failed to create ingestions_total metric");

    pub static ref INGESTION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_ingestion_duration_seconds"),
            "Time from upload start to catalog entry, by outcome"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["outcome"]
    ).expect("Failed to create ingestion_duration_seconds metric");

    // Catalog Metrics
    pub static ref CATALOG_PHOTOS_TOTAL: Gauge = Gauge::new(
        format!("{PREFIX}_catalog_photos_total"),
        "Photos in the catalog"
    ).expect("Failed to create catalog_photos_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(INGESTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INGESTION_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CATALOG_PHOTOS_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn init_catalog_metrics(num_photos: usize) {
    CATALOG_PHOTOS_TOTAL.set(num_photos as f64);
    tracing::info!("Catalog metrics initialized: {} photos", num_photos);
}

/// Collapse a request path to its route so ids don't blow up label cardinality.
pub fn categorize_endpoint(path: &str) -> &'static str {
    match path {
        "/" => "/",
        "/upload" => "/upload",
        "/photos" => "/photos",
        "/photos/timeline" => "/photos/timeline",
        p if p.starts_with("/photos/") => "/photos/{id}",
        _ => "other",
    }
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let endpoint = categorize_endpoint(path);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, endpoint])
        .observe(duration.as_secs_f64());
}

/// Record the outcome of one ingestion. A new catalog entry bumps the photo count.
pub fn record_ingestion(outcome: &str, duration: Duration) {
    INGESTIONS_TOTAL.with_label_values(&[outcome]).inc();
    INGESTION_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration.as_secs_f64());
    if outcome == "ingested" {
        CATALOG_PHOTOS_TOTAL.inc();
    }
}

/// Record a file rejected before it reached the pipeline.
pub fn record_rejected_upload() {
    INGESTIONS_TOTAL.with_label_values(&["rejected"]).inc();
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
