//! Outbound RPC to order-service nodes.
//!
//! [`OrderRpc`] is the client-side view of a node's RPC surface; peers,
//! the replication engine, and the leader coordinator all talk through it.
//! [`HttpPeerClient`] is the production implementation, posting JSON with
//! `reqwest` to the routes in [`crate::rpc`].
//!
//! Failures are split in two: transport failures ([`PeerError::Unreachable`],
//! [`PeerError::Timeout`]) mean "the node could not be reached" and drive
//! OFFLINE marks and re-elections; application failures
//! ([`PeerError::Rejected`], [`PeerError::Decode`]) mean the node answered.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::node::Address;
use crate::rpc::{
    AcceptOrdersRequest, AcceptOrdersResponse, BuyRequest, BuyResponse, FetchAllOrdersRequest,
    FetchAllOrdersResponse, HealthRequest, HealthResponse, LeaderAssignment,
    LeaderAssignmentResponse, QueryOrderRequest, QueryOrderResponse,
    ACCEPT_ORDERS_FROM_LEADER_PATH, ASSIGN_LEADER_PATH, BUY_PATH, CHECK_HEALTH_PATH,
    FETCH_ALL_ORDERS_FROM_PATH, QUERY_ORDER_NUMBER_PATH,
};

/// Errors raised while calling another node.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The connection could not be established or broke mid-call.
    #[error("peer {address} unreachable: {reason}")]
    Unreachable { address: String, reason: String },

    /// No answer within the deadline.
    #[error("peer {address} did not answer within {after:?}")]
    Timeout { address: String, after: Duration },

    /// The peer answered with a non-success status.
    #[error("peer {address} rejected the call with status {status}: {message}")]
    Rejected {
        address: String,
        status: u16,
        message: String,
    },

    /// The peer answered but the body could not be decoded.
    #[error("peer {address} sent an unreadable response: {reason}")]
    Decode { address: String, reason: String },
}

impl PeerError {
    /// Whether the node itself could not be reached.
    pub fn is_transport(&self) -> bool {
        matches!(self, PeerError::Unreachable { .. } | PeerError::Timeout { .. })
    }
}

/// Boxed future returned by every [`OrderRpc`] method.
pub type RpcFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PeerError>> + Send + 'a>>;

/// Client-side view of one node's RPC surface.
pub trait OrderRpc: Send + Sync + 'static {
    fn buy(&self, req: BuyRequest) -> RpcFuture<'_, BuyResponse>;

    fn query_order_number(&self, req: QueryOrderRequest) -> RpcFuture<'_, QueryOrderResponse>;

    /// Liveness probe; implementations apply their health deadline.
    fn check_health(&self, req: HealthRequest) -> RpcFuture<'_, HealthResponse>;

    fn assign_leader(&self, req: LeaderAssignment) -> RpcFuture<'_, LeaderAssignmentResponse>;

    fn fetch_all_orders_from(
        &self,
        req: FetchAllOrdersRequest,
    ) -> RpcFuture<'_, FetchAllOrdersResponse>;

    fn accept_orders_from_leader(
        &self,
        req: AcceptOrdersRequest,
    ) -> RpcFuture<'_, AcceptOrdersResponse>;
}

/// Bound `call` by `deadline`, independent of the transport's own timeouts.
pub async fn with_deadline<T, F>(address: &str, deadline: Duration, call: F) -> Result<T, PeerError>
where
    F: Future<Output = Result<T, PeerError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(PeerError::Timeout {
            address: address.to_string(),
            after: deadline,
        }),
    }
}

// -- HTTP implementation ------------------------------------------------------

/// [`OrderRpc`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: reqwest::Client,
    address: String,
    base_url: String,
    rpc_timeout: Duration,
    health_timeout: Duration,
}

impl HttpPeerClient {
    /// Build a client for the node at `address`.
    ///
    /// `rpc_timeout` bounds every call except health checks, which use the
    /// shorter `health_timeout`.
    pub fn new(
        address: &Address,
        rpc_timeout: Duration,
        health_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(rpc_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        Ok(Self {
            client,
            address: address.to_string(),
            base_url: format!("http://{address}"),
            rpc_timeout,
            health_timeout,
        })
    }

    async fn call<Req, Resp>(
        &self,
        path: &str,
        body: &Req,
        timeout: Duration,
    ) -> Result<Resp, PeerError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "Calling peer");

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PeerError::Rejected {
                address: self.address.clone(),
                status: status.as_u16(),
                message: error_message_from_body(&text),
            });
        }

        response.json::<Resp>().await.map_err(|e| {
            if e.is_timeout() {
                self.transport_error(e, timeout)
            } else {
                PeerError::Decode {
                    address: self.address.clone(),
                    reason: e.to_string(),
                }
            }
        })
    }

    fn transport_error(&self, err: reqwest::Error, timeout: Duration) -> PeerError {
        if err.is_timeout() {
            PeerError::Timeout {
                address: self.address.clone(),
                after: timeout,
            }
        } else {
            PeerError::Unreachable {
                address: self.address.clone(),
                reason: err.to_string(),
            }
        }
    }
}

/// Pull `error.message` out of an error body, falling back to the raw text.
fn error_message_from_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

impl OrderRpc for HttpPeerClient {
    fn buy(&self, req: BuyRequest) -> RpcFuture<'_, BuyResponse> {
        Box::pin(async move { self.call(BUY_PATH, &req, self.rpc_timeout).await })
    }

    fn query_order_number(&self, req: QueryOrderRequest) -> RpcFuture<'_, QueryOrderResponse> {
        Box::pin(async move {
            self.call(QUERY_ORDER_NUMBER_PATH, &req, self.rpc_timeout)
                .await
        })
    }

    fn check_health(&self, req: HealthRequest) -> RpcFuture<'_, HealthResponse> {
        Box::pin(async move { self.call(CHECK_HEALTH_PATH, &req, self.health_timeout).await })
    }

    fn assign_leader(&self, req: LeaderAssignment) -> RpcFuture<'_, LeaderAssignmentResponse> {
        Box::pin(async move { self.call(ASSIGN_LEADER_PATH, &req, self.rpc_timeout).await })
    }

    fn fetch_all_orders_from(
        &self,
        req: FetchAllOrdersRequest,
    ) -> RpcFuture<'_, FetchAllOrdersResponse> {
        Box::pin(async move {
            self.call(FETCH_ALL_ORDERS_FROM_PATH, &req, self.rpc_timeout)
                .await
        })
    }

    fn accept_orders_from_leader(
        &self,
        req: AcceptOrdersRequest,
    ) -> RpcFuture<'_, AcceptOrdersResponse> {
        Box::pin(async move {
            self.call(ACCEPT_ORDERS_FROM_LEADER_PATH, &req, self.rpc_timeout)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_from_json_body() {
        let body = r#"{"error":{"code":"NotLeader","message":"node 2 is not the leader"}}"#;
        assert_eq!(error_message_from_body(body), "node 2 is not the leader");
    }

    #[test]
    fn test_error_message_from_plain_body() {
        assert_eq!(error_message_from_body("boom"), "boom");
    }

    #[test]
    fn test_transport_classification() {
        let down = PeerError::Unreachable {
            address: "127.0.0.1:1".to_string(),
            reason: "connection refused".to_string(),
        };
        let slow = PeerError::Timeout {
            address: "127.0.0.1:1".to_string(),
            after: Duration::from_millis(10),
        };
        let rejected = PeerError::Rejected {
            address: "127.0.0.1:1".to_string(),
            status: 409,
            message: "not leader".to_string(),
        };
        assert!(down.is_transport());
        assert!(slow.is_transport());
        assert!(!rejected.is_transport());
    }

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let result: Result<(), PeerError> = with_deadline(
            "10.0.0.1:1766",
            Duration::from_millis(20),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(result, Err(PeerError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_transport_error() {
        // Bind then drop a listener so the port is (almost certainly) closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = HttpPeerClient::new(
            &Address::new("127.0.0.1", port),
            Duration::from_secs(2),
            Duration::from_secs(1),
        )
        .unwrap();
        let err = client.check_health(HealthRequest::probe()).await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
    }
}
