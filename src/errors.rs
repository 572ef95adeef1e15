//! Order-service error types.
//!
//! Handlers return `Result<Json<_>, OrderError>`; the enum implements
//! [`axum::response::IntoResponse`] and renders a JSON error body.
//! Business refusals (unknown order, insufficient stock) are not errors:
//! they travel in the normal response with `success: false`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::cluster::NodeId;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

#[derive(Debug, Error)]
pub enum OrderError {
    /// The request failed validation.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// Strict mode: this node does not believe itself leader.
    #[error("node {self_id} is not the leader (current leader: {})", leader_text(.leader))]
    NotLeader {
        self_id: NodeId,
        leader: Option<NodeId>,
    },

    /// The catalog could not be consulted.
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// Catch-all for unexpected internal errors.
    #[error("We encountered an internal error, please try again.")]
    Internal(#[from] anyhow::Error),
}

fn leader_text(leader: &Option<NodeId>) -> String {
    leader.map_or_else(|| "unknown".to_string(), |id| id.to_string())
}

impl OrderError {
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::InvalidArgument { .. } => "InvalidArgument",
            OrderError::NotLeader { .. } => "NotLeader",
            OrderError::CatalogUnavailable(_) => "CatalogUnavailable",
            OrderError::Internal(_) => "InternalError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            OrderError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            OrderError::NotLeader { .. } => StatusCode::CONFLICT,
            OrderError::CatalogUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            OrderError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<garde::Report> for OrderError {
    fn from(report: garde::Report) -> Self {
        OrderError::InvalidArgument {
            message: report.to_string(),
        }
    }
}

impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();
        if let OrderError::Internal(ref e) = self {
            tracing::error!(request_id = %request_id, "Internal error: {e:#}");
        }

        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "requestId": request_id,
            }
        });

        (status, [("x-request-id", request_id)], Json(body)).into_response()
    }
}
