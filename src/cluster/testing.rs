//! In-process [`OrderRpc`] double used by unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::client::{OrderRpc, PeerError, RpcFuture};
use super::node::{Address, NodeId, OrderNode};
use crate::orderlog::OrderRecord;
use crate::rpc::{
    AcceptOrdersRequest, AcceptOrdersResponse, BuyRequest, BuyResponse, FetchAllOrdersRequest,
    FetchAllOrdersResponse, HealthRequest, HealthResponse, LeaderAssignment,
    LeaderAssignmentResponse, QueryOrderRequest, QueryOrderResponse, HEALTH_REPLY_MESSAGE,
    ORDER_NOT_FOUND_MESSAGE,
};

/// A scriptable peer: holds its own little order map, can be taken down,
/// and remembers what it was asked.
pub(crate) struct FakePeer {
    pub id: NodeId,
    up: AtomicBool,
    delay: Mutex<Option<Duration>>,
    pub orders: Mutex<BTreeMap<i64, OrderRecord>>,
    pub assignments: Mutex<Vec<NodeId>>,
    pub health_checks: AtomicUsize,
    pub buys: AtomicUsize,
}

impl FakePeer {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            up: AtomicBool::new(true),
            delay: Mutex::new(None),
            orders: Mutex::new(BTreeMap::new()),
            assignments: Mutex::new(Vec::new()),
            health_checks: AtomicUsize::new(0),
            buys: AtomicUsize::new(0),
        }
    }

    pub fn with_orders(id: NodeId, records: &[OrderRecord]) -> Self {
        let peer = Self::new(id);
        peer.orders
            .lock()
            .unwrap()
            .extend(records.iter().map(|r| (r.order_number, r.clone())));
        peer
    }

    /// Wrap `client` in an [`OrderNode`] with a made-up address.
    pub fn node(id: NodeId, client: Arc<dyn OrderRpc>) -> OrderNode {
        OrderNode::new(id, Address::new("10.0.0.1", 1700 + id as u16), client)
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    /// Make every call sleep before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn records(&self) -> Vec<OrderRecord> {
        self.orders.lock().unwrap().values().cloned().collect()
    }

    async fn gate(&self) -> Result<(), PeerError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PeerError::Unreachable {
                address: format!("fake-{}", self.id),
                reason: "connection refused".to_string(),
            })
        }
    }
}

impl OrderRpc for FakePeer {
    fn buy(&self, req: BuyRequest) -> RpcFuture<'_, BuyResponse> {
        Box::pin(async move {
            self.gate().await?;
            self.buys.fetch_add(1, Ordering::SeqCst);
            let mut orders = self.orders.lock().unwrap();
            let next = orders.keys().next_back().copied().unwrap_or(0) + 1;
            orders.insert(next, OrderRecord::new(next, req.name, req.quantity));
            Ok(BuyResponse::placed(next))
        })
    }

    fn query_order_number(&self, req: QueryOrderRequest) -> RpcFuture<'_, QueryOrderResponse> {
        Box::pin(async move {
            self.gate().await?;
            let order = self.orders.lock().unwrap().get(&req.order_number).cloned();
            Ok(QueryOrderResponse {
                success: order.is_some(),
                error_message: order
                    .is_none()
                    .then(|| ORDER_NOT_FOUND_MESSAGE.to_string()),
                order,
            })
        })
    }

    fn check_health(&self, _req: HealthRequest) -> RpcFuture<'_, HealthResponse> {
        Box::pin(async move {
            self.health_checks.fetch_add(1, Ordering::SeqCst);
            self.gate().await?;
            Ok(HealthResponse {
                message: HEALTH_REPLY_MESSAGE.to_string(),
            })
        })
    }

    fn assign_leader(&self, req: LeaderAssignment) -> RpcFuture<'_, LeaderAssignmentResponse> {
        Box::pin(async move {
            self.gate().await?;
            self.assignments.lock().unwrap().push(req.id);
            Ok(LeaderAssignmentResponse {
                message: format!("Received the leader id: {}", req.id),
            })
        })
    }

    fn fetch_all_orders_from(
        &self,
        req: FetchAllOrdersRequest,
    ) -> RpcFuture<'_, FetchAllOrdersResponse> {
        Box::pin(async move {
            self.gate().await?;
            let orders = self
                .orders
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.order_number > req.after_order_number)
                .cloned()
                .collect();
            Ok(FetchAllOrdersResponse {
                orders,
                after_order_number: req.after_order_number,
            })
        })
    }

    fn accept_orders_from_leader(
        &self,
        req: AcceptOrdersRequest,
    ) -> RpcFuture<'_, AcceptOrdersResponse> {
        Box::pin(async move {
            self.gate().await?;
            let mut orders = self.orders.lock().unwrap();
            let success = !orders.contains_key(&req.order.order_number);
            if success {
                orders.insert(req.order.order_number, req.order);
            }
            Ok(AcceptOrdersResponse { success })
        })
    }
}
