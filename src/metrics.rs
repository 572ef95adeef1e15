//! Prometheus metrics for the order service.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

use crate::rpc::{
    ACCEPT_ORDERS_FROM_LEADER_PATH, ASSIGN_LEADER_PATH, BUY_PATH, CHECK_HEALTH_PATH,
    FETCH_ALL_ORDERS_FROM_PATH, QUERY_ORDER_NUMBER_PATH,
};

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "orderstore_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "orderstore_http_request_duration_seconds";

/// Orders committed to the local log by a buy (counter).
pub const ORDERS_CREATED_TOTAL: &str = "orderstore_orders_created_total";

/// Buys that did not produce an order (counter). Labels: reason.
pub const BUY_FAILURES_TOTAL: &str = "orderstore_buy_failures_total";

/// Outbound replication calls (counter). Labels: kind, outcome.
pub const REPLICATION_RPCS_TOTAL: &str = "orderstore_replication_rpcs_total";

/// Records written locally by bootstrap sync (counter).
pub const SYNC_RECORDS_INSERTED_TOTAL: &str = "orderstore_sync_records_inserted_total";

/// Peers currently believed ACTIVE, self excluded (gauge).
pub const PEERS_ACTIVE: &str = "orderstore_peers_active";

/// Highest order number in the local log (gauge).
pub const ORDER_LOG_MAX_KEY: &str = "orderstore_order_log_max_key";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(ORDERS_CREATED_TOTAL, "Orders committed by buy requests");
    describe_counter!(BUY_FAILURES_TOTAL, "Buy requests that produced no order");
    describe_counter!(
        REPLICATION_RPCS_TOTAL,
        "Outbound replication calls by kind and outcome"
    );
    describe_counter!(
        SYNC_RECORDS_INSERTED_TOTAL,
        "Records inserted by bootstrap sync"
    );
    describe_gauge!(PEERS_ACTIVE, "Peers currently believed reachable");
    describe_gauge!(ORDER_LOG_MAX_KEY, "Highest order number in the local log");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path, "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Map a request path to a metric label.
///
/// Every route is a fixed path, so known routes label as themselves and
/// anything else collapses to `/{other}`.
fn normalize_path(path: &str) -> &'static str {
    const KNOWN: &[&str] = &[
        "/health",
        "/readyz",
        "/status",
        "/metrics",
        "/openapi.json",
        BUY_PATH,
        QUERY_ORDER_NUMBER_PATH,
        CHECK_HEALTH_PATH,
        ASSIGN_LEADER_PATH,
        FETCH_ALL_ORDERS_FROM_PATH,
        ACCEPT_ORDERS_FROM_LEADER_PATH,
    ];
    KNOWN
        .iter()
        .copied()
        .find(|known| *known == path)
        .unwrap_or("/{other}")
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    let body = PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}
