//! Peer- and coordinator-facing RPCs.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::errors::OrderError;
use crate::rpc::{
    AcceptOrdersRequest, AcceptOrdersResponse, FetchAllOrdersRequest, FetchAllOrdersResponse,
    HealthRequest, HealthResponse, LeaderAssignment, LeaderAssignmentResponse,
};
use crate::AppState;

#[utoipa::path(
    post,
    path = "/rpc/check-health",
    tag = "Cluster",
    operation_id = "CheckHealth",
    request_body = HealthRequest,
    responses((status = 200, description = "Node is up", body = HealthResponse))
)]
pub async fn check_health(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HealthRequest>,
) -> Json<HealthResponse> {
    Json(state.service.check_health(req))
}

#[utoipa::path(
    post,
    path = "/rpc/assign-leader",
    tag = "Cluster",
    operation_id = "AssignLeader",
    request_body = LeaderAssignment,
    responses((status = 200, description = "Leader recorded", body = LeaderAssignmentResponse))
)]
pub async fn assign_leader(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LeaderAssignment>,
) -> Result<Json<LeaderAssignmentResponse>, OrderError> {
    Ok(Json(state.service.assign_leader(req).await?))
}

#[utoipa::path(
    post,
    path = "/rpc/fetch-all-orders-from",
    tag = "Cluster",
    operation_id = "FetchAllOrdersFrom",
    request_body = FetchAllOrdersRequest,
    responses((status = 200, description = "Records above the given number", body = FetchAllOrdersResponse))
)]
pub async fn fetch_all_orders_from(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FetchAllOrdersRequest>,
) -> Result<Json<FetchAllOrdersResponse>, OrderError> {
    Ok(Json(state.service.fetch_all_orders_from(req).await?))
}

#[utoipa::path(
    post,
    path = "/rpc/accept-orders-from-leader",
    tag = "Cluster",
    operation_id = "AcceptOrdersFromLeader",
    request_body = AcceptOrdersRequest,
    responses((status = 200, description = "Whether the record was new", body = AcceptOrdersResponse))
)]
pub async fn accept_orders_from_leader(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AcceptOrdersRequest>,
) -> Result<Json<AcceptOrdersResponse>, OrderError> {
    Ok(Json(state.service.accept_orders_from_leader(req).await?))
}
