//! Request and response bodies for the order-service RPC surface.
//!
//! Every RPC is a `POST` with a JSON body to one of the `*_PATH` routes
//! below.  The same types are used by the axum handlers and by
//! [`crate::cluster::client::HttpPeerClient`], so the two sides cannot
//! drift apart.  Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::cluster::node::NodeId;
use crate::orderlog::OrderRecord;

pub const BUY_PATH: &str = "/rpc/buy";
pub const QUERY_ORDER_NUMBER_PATH: &str = "/rpc/query-order-number";
pub const CHECK_HEALTH_PATH: &str = "/rpc/check-health";
pub const ASSIGN_LEADER_PATH: &str = "/rpc/assign-leader";
pub const FETCH_ALL_ORDERS_FROM_PATH: &str = "/rpc/fetch-all-orders-from";
pub const ACCEPT_ORDERS_FROM_LEADER_PATH: &str = "/rpc/accept-orders-from-leader";

/// Message sent by health probes.
pub const HEALTH_PROBE_MESSAGE: &str = "Are you online?";

/// Reply to every health probe.
pub const HEALTH_REPLY_MESSAGE: &str = "I am online!";

/// Error text for a query on an unknown order number.
pub const ORDER_NOT_FOUND_MESSAGE: &str = "No records found with the given order number";

// -- Buy ----------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct BuyRequest {
    /// Product name.
    #[garde(length(min = 1))]
    pub name: String,
    /// Units to buy.
    #[garde(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuyResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl BuyResponse {
    pub fn placed(order_number: i64) -> Self {
        Self {
            success: true,
            order_number: Some(order_number),
            error_message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            order_number: None,
            error_message: Some(message.into()),
        }
    }
}

// -- QueryOrderNumber -----------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryOrderRequest {
    pub order_number: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryOrderResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// -- CheckHealth ----------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthRequest {
    pub message: String,
}

impl HealthRequest {
    pub fn probe() -> Self {
        Self {
            message: HEALTH_PROBE_MESSAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub message: String,
}

// -- AssignLeader ---------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaderAssignment {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaderAssignmentResponse {
    pub message: String,
}

// -- FetchAllOrdersFrom ---------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FetchAllOrdersRequest {
    pub requester_id: NodeId,
    pub after_order_number: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FetchAllOrdersResponse {
    pub orders: Vec<OrderRecord>,
    pub after_order_number: i64,
}

// -- AcceptOrdersFromLeader -----------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcceptOrdersRequest {
    pub order: OrderRecord,
    pub requester_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AcceptOrdersResponse {
    pub success: bool,
}
