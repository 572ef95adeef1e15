//! Axum router construction.
//!
//! The [`app`] function wires every RPC route and the infrastructure
//! endpoints to their handlers and returns a ready-to-serve
//! [`axum::Router`].

use axum::{
    extract::State,
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::errors::{generate_request_id, OrderError};
use crate::handlers::{cluster, orders};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::rpc::{
    ACCEPT_ORDERS_FROM_LEADER_PATH, ASSIGN_LEADER_PATH, BUY_PATH, CHECK_HEALTH_PATH,
    FETCH_ALL_ORDERS_FROM_PATH, QUERY_ORDER_NUMBER_PATH,
};
use crate::service::ServiceStatus;
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    info(
        title = "orderstore",
        version = "0.1.0",
        description = "Replicated order-log service"
    ),
    paths(
        health_check,
        readiness,
        status,
        orders::buy,
        orders::query_order_number,
        cluster::check_health,
        cluster::assign_leader,
        cluster::fetch_all_orders_from,
        cluster::accept_orders_from_leader,
    ),
    tags(
        (name = "Health", description = "Liveness, readiness and status"),
        (name = "Orders", description = "Buying and looking up orders"),
        (name = "Cluster", description = "Leader assignment and replication"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`] with every route and layer.
pub fn app(state: Arc<AppState>) -> Router {
    let max_concurrent = state.config.server.max_concurrent_requests.max(1);

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/readyz", get(readiness))
        .route("/status", get(status))
        .route("/openapi.json", get(openapi_json))
        .route(BUY_PATH, post(orders::buy))
        .route(QUERY_ORDER_NUMBER_PATH, post(orders::query_order_number))
        .route(CHECK_HEALTH_PATH, post(cluster::check_health))
        .route(ASSIGN_LEADER_PATH, post(cluster::assign_leader))
        .route(
            FETCH_ALL_ORDERS_FROM_PATH,
            post(cluster::fetch_all_orders_from),
        )
        .route(
            ACCEPT_ORDERS_FROM_LEADER_PATH,
            post(cluster::accept_orders_from_leader),
        );
    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(GlobalConcurrencyLimitLayer::new(max_concurrent))
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(TraceLayer::new_for_http())
        // metrics_middleware is outermost (captures queueing time too).
        .layer(middleware::from_fn(metrics_middleware))
}

// -- Common headers middleware -----------------------------------------------

/// Adds `x-request-id` (unless the error renderer already did), `Date`,
/// and `Server` to every response.
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert("date", value);
    }
    headers.insert("server", HeaderValue::from_static("orderstore"));

    response
}

// -- Infrastructure endpoints ------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Process is up")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// 503 until bootstrap sync has finished (or was skipped).
#[utoipa::path(
    get,
    path = "/readyz",
    tag = "Health",
    operation_id = "Readiness",
    responses(
        (status = 200, description = "Ready to serve"),
        (status = 503, description = "Bootstrap sync still running")
    )
)]
async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ready = !state.config.observability.health_check || state.ready.load(Ordering::Acquire);
    if ready {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "syncing" })),
        )
    }
}

#[utoipa::path(
    get,
    path = "/status",
    tag = "Health",
    operation_id = "Status",
    responses(
        (status = 200, description = "This node's view of the cluster", body = ServiceStatus)
    )
)]
async fn status(State(state): State<Arc<AppState>>) -> Result<Json<ServiceStatus>, OrderError> {
    Ok(Json(state.service.status().await?))
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
