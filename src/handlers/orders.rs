//! Client-facing RPCs: buy and query.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::errors::OrderError;
use crate::rpc::{BuyRequest, BuyResponse, QueryOrderRequest, QueryOrderResponse};
use crate::AppState;

/// Place an order. Replication to peers runs after the response is built
/// and never changes it.
#[utoipa::path(
    post,
    path = "/rpc/buy",
    tag = "Orders",
    operation_id = "Buy",
    request_body = BuyRequest,
    responses(
        (status = 200, description = "Order placed, or refused by the catalog", body = BuyResponse),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Not the leader (strict mode)"),
        (status = 503, description = "Catalog unavailable")
    )
)]
pub async fn buy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BuyRequest>,
) -> Result<Json<BuyResponse>, OrderError> {
    let (response, fan_out) = state.service.buy(req).await?;
    if let Some(fan_out) = fan_out {
        state.fan_outs.spawn(fan_out);
    }
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/rpc/query-order-number",
    tag = "Orders",
    operation_id = "QueryOrderNumber",
    request_body = QueryOrderRequest,
    responses(
        (status = 200, description = "Lookup result", body = QueryOrderResponse)
    )
)]
pub async fn query_order_number(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QueryOrderRequest>,
) -> Result<Json<QueryOrderResponse>, OrderError> {
    Ok(Json(state.service.query_order_number(req).await?))
}
