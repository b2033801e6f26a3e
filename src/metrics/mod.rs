use anyhow::Result;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use tokio::task::JoinHandle;
use tracing::info;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Cycle metrics
    pub static ref CYCLES_TOTAL: IntCounter = IntCounter::new(
        "captn_cycles_total",
        "Total number of update cycles run"
    ).unwrap();

    pub static ref CYCLE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "captn_cycle_duration_seconds",
            "Time spent running a full update cycle"
        ).buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0])
    ).unwrap();

    // Per-container update metrics
    pub static ref CONTAINERS_PROCESSED: IntCounter = IntCounter::new(
        "captn_containers_processed_total",
        "Total number of containers evaluated across all cycles"
    ).unwrap();

    pub static ref UPDATES_APPLIED: IntCounter = IntCounter::new(
        "captn_updates_applied_total",
        "Total number of updates successfully applied"
    ).unwrap();

    pub static ref UPDATES_FAILED: IntCounter = IntCounter::new(
        "captn_updates_failed_total",
        "Total number of updates that failed to apply"
    ).unwrap();

    pub static ref UPDATES_ROLLED_BACK: IntCounter = IntCounter::new(
        "captn_updates_rolled_back_total",
        "Total number of updates rolled back after a failed verify"
    ).unwrap();

    pub static ref UPDATES_SKIPPED: IntCounter = IntCounter::new(
        "captn_updates_skipped_total",
        "Total number of candidate updates skipped by policy"
    ).unwrap();

    // Registry metrics
    pub static ref REGISTRY_REQUESTS_TOTAL: IntCounter = IntCounter::new(
        "captn_registry_requests_total",
        "Total number of registry tag/manifest requests issued"
    ).unwrap();

    pub static ref REGISTRY_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "captn_registry_errors_total",
        "Total number of registry requests that failed"
    ).unwrap();

    // Cleanup metrics
    pub static ref BACKUPS_PRUNED_TOTAL: IntCounter = IntCounter::new(
        "captn_backups_pruned_total",
        "Total number of backup containers removed during cleanup"
    ).unwrap();

    pub static ref IMAGES_PRUNED_TOTAL: IntCounter = IntCounter::new(
        "captn_images_pruned_total",
        "Total number of dangling images removed during cleanup"
    ).unwrap();

    // Self-update metrics
    pub static ref SELF_UPDATES_TRIGGERED: IntCounter = IntCounter::new(
        "captn_self_updates_triggered_total",
        "Total number of self-update helper containers spawned"
    ).unwrap();

    pub static ref SELF_CONTAINER_DETECTED: IntGauge = IntGauge::new(
        "captn_self_container_detected",
        "1 if the running process identified itself among managed containers, else 0"
    ).unwrap();
}

pub fn register_metrics() {
    REGISTRY.register(Box::new(CYCLES_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(CYCLE_DURATION.clone())).ok();
    REGISTRY.register(Box::new(CONTAINERS_PROCESSED.clone())).ok();
    REGISTRY.register(Box::new(UPDATES_APPLIED.clone())).ok();
    REGISTRY.register(Box::new(UPDATES_FAILED.clone())).ok();
    REGISTRY.register(Box::new(UPDATES_ROLLED_BACK.clone())).ok();
    REGISTRY.register(Box::new(UPDATES_SKIPPED.clone())).ok();
    REGISTRY.register(Box::new(REGISTRY_REQUESTS_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(REGISTRY_ERRORS_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(BACKUPS_PRUNED_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(IMAGES_PRUNED_TOTAL.clone())).ok();
    REGISTRY.register(Box::new(SELF_UPDATES_TRIGGERED.clone())).ok();
    REGISTRY.register(Box::new(SELF_CONTAINER_DETECTED.clone())).ok();

    info!("metrics registered");
}

pub async fn start_metrics_server(addr: &str) -> Result<JoinHandle<()>> {
    register_metrics();

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_check));

    let addr = addr.to_string();
    info!(addr, "starting metrics server");

    let handle = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind metrics server");
        axum::serve(listener, app).await.expect("metrics server failed");
    });

    Ok(handle)
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to encode metrics: {e}")).into_response();
    }

    (StatusCode::OK, [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], buffer).into_response()
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
