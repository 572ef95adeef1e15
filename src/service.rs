//! The order service node: everything behind the RPC surface.
//!
//! [`OrderService`] ties the order log, the order number sequence, the
//! replica registry, the catalog, and the replicator together. The axum
//! handlers in [`crate::handlers`] are thin wrappers over its methods.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use garde::Validate;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::catalog::Catalog;
use crate::cluster::{
    FanOutReport, NodeId, NodeMode, NodeStatus, NodeView, ReplicaRegistry, Replicator, SyncReport,
};
use crate::errors::OrderError;
use crate::metrics::{BUY_FAILURES_TOTAL, ORDERS_CREATED_TOTAL, ORDER_LOG_MAX_KEY};
use crate::orderlog::{OrderLog, OrderRecord};
use crate::rpc::{
    AcceptOrdersRequest, AcceptOrdersResponse, BuyRequest, BuyResponse, FetchAllOrdersRequest,
    FetchAllOrdersResponse, HealthRequest, HealthResponse, LeaderAssignment,
    LeaderAssignmentResponse, QueryOrderRequest, QueryOrderResponse, HEALTH_REPLY_MESSAGE,
    ORDER_NOT_FOUND_MESSAGE,
};
use crate::sequence::OrderSequence;

/// Tunables for [`OrderService::open`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub rpc_timeout: Duration,
    pub max_parallel_rpcs: usize,
    /// Refuse buys unless this node believes itself leader.
    pub strict_buy: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(5),
            max_parallel_rpcs: 16,
            strict_buy: false,
        }
    }
}

/// Replication still owed for a committed order.
///
/// Returned by [`OrderService::buy`] after the local commit. The caller
/// decides when it runs; dropping it skips replication entirely.
#[must_use = "a fan-out does nothing unless run"]
pub struct FanOut {
    replicator: Replicator,
    record: OrderRecord,
}

impl FanOut {
    pub fn record(&self) -> &OrderRecord {
        &self.record
    }

    pub async fn run(self) -> FanOutReport {
        self.replicator.fan_out(&self.record).await
    }
}

/// Fan-outs still running after their buy was answered.
///
/// Finished tasks are reaped on every spawn. [`drain`](Self::drain) waits
/// for the rest at shutdown.
#[derive(Default)]
pub struct FanOutTasks {
    tasks: Mutex<JoinSet<()>>,
}

impl FanOutTasks {
    pub fn spawn(&self, fan_out: FanOut) {
        let mut tasks = self.tasks.lock().expect("mutex poisoned");
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let order_number = fan_out.record().order_number;
            let report = fan_out.run().await;
            debug!(
                order_number,
                accepted = report.accepted.len(),
                duplicates = report.duplicates.len(),
                failed = report.failed.len(),
                "Fan-out finished"
            );
        });
    }

    pub fn pending(&self) -> usize {
        let mut tasks = self.tasks.lock().expect("mutex poisoned");
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Wait up to `grace` for running fan-outs, then abort what is left.
    ///
    /// Returns the number of fan-outs abandoned.
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().expect("mutex poisoned"));
        let deadline = tokio::time::Instant::now() + grace;
        while !tasks.is_empty() {
            if tokio::time::timeout_at(deadline, tasks.join_next())
                .await
                .is_err()
            {
                break;
            }
        }
        let abandoned = tasks.len();
        if abandoned > 0 {
            warn!(abandoned, "Abandoning fan-outs still in flight");
            tasks.abort_all();
        } else {
            debug!("All fan-outs finished");
        }
        abandoned
    }
}

/// What `GET /status` reports.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub self_id: NodeId,
    pub mode: NodeMode,
    pub current_leader: Option<NodeId>,
    pub max_order_number: i64,
    pub next_order_number: i64,
    pub nodes: Vec<NodeView>,
}

/// One order-service node.
pub struct OrderService {
    log: Arc<dyn OrderLog>,
    registry: Arc<ReplicaRegistry>,
    catalog: Arc<dyn Catalog>,
    sequence: Arc<OrderSequence>,
    replicator: Replicator,
    strict_buy: bool,
}

impl OrderService {
    /// Build the node around an already opened log.
    ///
    /// The order number sequence starts right above the log's max key.
    pub async fn open(
        log: Arc<dyn OrderLog>,
        registry: Arc<ReplicaRegistry>,
        catalog: Arc<dyn Catalog>,
        options: ServiceOptions,
    ) -> anyhow::Result<Self> {
        let max_key = log
            .max_key()
            .await
            .context("failed to read order log max key")?;
        let sequence = Arc::new(OrderSequence::starting_above(max_key));
        gauge!(ORDER_LOG_MAX_KEY).set(max_key as f64);

        let replicator = Replicator::new(
            Arc::clone(&registry),
            Arc::clone(&log),
            Arc::clone(&sequence),
            options.rpc_timeout,
            options.max_parallel_rpcs,
        );

        info!(
            self_id = registry.self_id(),
            max_key,
            strict_buy = options.strict_buy,
            "Order service opened"
        );

        Ok(Self {
            log,
            registry,
            catalog,
            sequence,
            replicator,
            strict_buy: options.strict_buy,
        })
    }

    pub fn registry(&self) -> &Arc<ReplicaRegistry> {
        &self.registry
    }

    pub fn log(&self) -> &Arc<dyn OrderLog> {
        &self.log
    }

    /// Place an order.
    ///
    /// Stock is taken from the catalog first; a refusal comes back as an
    /// unsuccessful [`BuyResponse`] with nothing written. On success the
    /// record is committed locally and a [`FanOut`] is returned for it.
    pub async fn buy(&self, req: BuyRequest) -> Result<(BuyResponse, Option<FanOut>), OrderError> {
        if let Err(report) = req.validate() {
            counter!(BUY_FAILURES_TOTAL, "reason" => "invalid").increment(1);
            return Err(report.into());
        }

        if self.strict_buy && !self.registry.is_self_leader() {
            counter!(BUY_FAILURES_TOTAL, "reason" => "not_leader").increment(1);
            return Err(OrderError::NotLeader {
                self_id: self.registry.self_id(),
                leader: self.registry.current_leader(),
            });
        }

        let change = match self
            .catalog
            .change_stock(&req.name, req.quantity, false)
            .await
        {
            Ok(change) => change,
            Err(e) => {
                warn!(name = %req.name, "Catalog call failed: {e:#}");
                counter!(BUY_FAILURES_TOTAL, "reason" => "catalog_unavailable").increment(1);
                return Err(OrderError::CatalogUnavailable(format!("{e:#}")));
            }
        };
        if !change.success {
            counter!(BUY_FAILURES_TOTAL, "reason" => "stock").increment(1);
            let message = change
                .error_message
                .unwrap_or_else(|| format!("{} could not be bought", req.name));
            info!(name = %req.name, quantity = req.quantity, "Buy refused: {message}");
            return Ok((BuyResponse::rejected(message), None));
        }

        let Some(order_number) = self.sequence.next() else {
            error!(name = %req.name, "Order numbers exhausted");
            counter!(BUY_FAILURES_TOTAL, "reason" => "exhausted").increment(1);
            self.restock(&req.name, req.quantity).await;
            return Err(OrderError::Internal(anyhow::anyhow!(
                "no order numbers left to mint"
            )));
        };
        let record = OrderRecord::new(order_number, req.name, req.quantity);
        let committed = match self.log.insert(record.clone()).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(anyhow::anyhow!(
                "order number {} is already taken",
                record.order_number
            )),
            Err(e) => Err(e),
        };

        if let Err(e) = committed {
            error!(
                order_number = record.order_number,
                "Failed to commit order: {e:#}"
            );
            counter!(BUY_FAILURES_TOTAL, "reason" => "storage").increment(1);
            self.restock(&record.product_name, record.quantity).await;
            if let Ok(max_key) = self.log.max_key().await {
                self.sequence.reset_above(max_key);
            }
            return Err(OrderError::Internal(e));
        }

        counter!(ORDERS_CREATED_TOTAL).increment(1);
        gauge!(ORDER_LOG_MAX_KEY).set(record.order_number as f64);
        info!(
            order_number = record.order_number,
            name = %record.product_name,
            quantity = record.quantity,
            "Order placed"
        );

        let response = BuyResponse::placed(record.order_number);
        let fan_out = FanOut {
            replicator: self.replicator.clone(),
            record,
        };
        Ok((response, Some(fan_out)))
    }

    /// Give back the stock taken for an order that was never committed.
    async fn restock(&self, name: &str, quantity: i32) {
        match self.catalog.change_stock(name, quantity, true).await {
            Ok(change) if change.success => {
                info!(name, quantity, "Stock restored");
            }
            Ok(change) => warn!(
                name,
                "Catalog refused restock: {}",
                change.error_message.unwrap_or_default()
            ),
            Err(e) => warn!(name, "Restock failed: {e:#}"),
        }
    }

    pub async fn query_order_number(
        &self,
        req: QueryOrderRequest,
    ) -> Result<QueryOrderResponse, OrderError> {
        let order = self.log.get(req.order_number).await?;
        Ok(match order {
            Some(order) => QueryOrderResponse {
                success: true,
                order: Some(order),
                error_message: None,
            },
            None => QueryOrderResponse {
                success: false,
                order: None,
                error_message: Some(ORDER_NOT_FOUND_MESSAGE.to_string()),
            },
        })
    }

    pub fn check_health(&self, _req: HealthRequest) -> HealthResponse {
        HealthResponse {
            message: HEALTH_REPLY_MESSAGE.to_string(),
        }
    }

    /// Record the coordinator's choice of leader.
    ///
    /// A node told it is the leader moves its sequence above everything it
    /// holds, so numbers it mints cannot collide with synced records.
    pub async fn assign_leader(
        &self,
        req: LeaderAssignment,
    ) -> Result<LeaderAssignmentResponse, OrderError> {
        self.registry.assign_leader(req.id);

        let mut message = format!("Received the leader id: {}", req.id);
        if req.id == self.registry.self_id() {
            let max_key = self.log.max_key().await?;
            let next = self.sequence.reset_above(max_key);
            info!(max_key, next_order_number = next, "This node is now the leader");
            message.push_str(", I am the leader!");
        }
        Ok(LeaderAssignmentResponse { message })
    }

    /// Serve a peer's bootstrap sync. A peer asking is evidently alive.
    pub async fn fetch_all_orders_from(
        &self,
        req: FetchAllOrdersRequest,
    ) -> Result<FetchAllOrdersResponse, OrderError> {
        self.registry
            .mark_status(req.requester_id, NodeStatus::Active);
        let orders = self.log.range_after(req.after_order_number).await?;
        info!(
            peer = req.requester_id,
            after = req.after_order_number,
            records = orders.len(),
            "Serving records to peer"
        );
        Ok(FetchAllOrdersResponse {
            orders,
            after_order_number: req.after_order_number,
        })
    }

    /// Store one record pushed by the leader. `false` means already held.
    pub async fn accept_orders_from_leader(
        &self,
        req: AcceptOrdersRequest,
    ) -> Result<AcceptOrdersResponse, OrderError> {
        let order_number = req.order.order_number;
        let success = self.log.insert(req.order).await?;
        // Keep minting above replicated keys in case this node takes buys.
        self.sequence.reset_above(order_number);
        if success {
            gauge!(ORDER_LOG_MAX_KEY).set(self.log.max_key().await? as f64);
        }
        info!(
            peer = req.requester_id,
            order_number,
            inserted = success,
            "Accepted order from leader"
        );
        Ok(AcceptOrdersResponse { success })
    }

    pub async fn bootstrap_sync(&self) -> anyhow::Result<SyncReport> {
        self.replicator.bootstrap_sync().await
    }

    pub async fn status(&self) -> Result<ServiceStatus, OrderError> {
        Ok(ServiceStatus {
            self_id: self.registry.self_id(),
            mode: self.registry.self_mode(),
            current_leader: self.registry.current_leader(),
            max_order_number: self.log.max_key().await?,
            next_order_number: self.sequence.peek(),
            nodes: self.registry.snapshot().iter().map(|n| n.view()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryCatalog;
    use crate::cluster::testing::FakePeer;
    use crate::cluster::OrderNode;
    use crate::orderlog::memory::MemoryOrderLog;
    use std::future::Future;
    use std::pin::Pin;

    struct Node {
        service: OrderService,
        catalog: Arc<MemoryCatalog>,
        peers: Vec<Arc<FakePeer>>,
    }

    async fn node_with(
        self_id: NodeId,
        peer_ids: &[NodeId],
        log: Arc<dyn OrderLog>,
        options: ServiceOptions,
    ) -> Node {
        let peers: Vec<Arc<FakePeer>> = peer_ids
            .iter()
            .map(|&id| Arc::new(FakePeer::new(id)))
            .collect();
        let mut nodes: Vec<OrderNode> = peers
            .iter()
            .map(|p| FakePeer::node(p.id, p.clone()))
            .collect();
        nodes.push(FakePeer::node(self_id, Arc::new(FakePeer::new(self_id))));

        let registry = Arc::new(ReplicaRegistry::new(self_id, nodes));
        let catalog = Arc::new(MemoryCatalog::new([
            ("Tux".to_string(), 10),
            ("Fox".to_string(), 1),
        ]));
        let service = OrderService::open(log, registry, catalog.clone(), options)
            .await
            .unwrap();
        Node {
            service,
            catalog,
            peers,
        }
    }

    async fn node(self_id: NodeId, peer_ids: &[NodeId]) -> Node {
        node_with(
            self_id,
            peer_ids,
            Arc::new(MemoryOrderLog::new()),
            ServiceOptions {
                rpc_timeout: Duration::from_millis(200),
                ..ServiceOptions::default()
            },
        )
        .await
    }

    fn buy(name: &str, quantity: i32) -> BuyRequest {
        BuyRequest {
            name: name.to_string(),
            quantity,
        }
    }

    #[tokio::test]
    async fn test_buy_commits_and_replicates() {
        let node = node(1, &[2, 3]).await;

        let (response, fan_out) = node.service.buy(buy("Tux", 2)).await.unwrap();
        assert_eq!(response, BuyResponse::placed(1));
        assert_eq!(node.catalog.stock_of("Tux"), Some(8));

        let report = fan_out.unwrap().run().await;
        assert_eq!(report.accepted, vec![2, 3]);
        for peer in &node.peers {
            assert_eq!(peer.records(), vec![OrderRecord::new(1, "Tux", 2)]);
        }
    }

    #[tokio::test]
    async fn test_buy_numbers_are_consecutive() {
        let node = node(1, &[]).await;
        for expected in 1..=3 {
            let (response, _) = node.service.buy(buy("Tux", 1)).await.unwrap();
            assert_eq!(response.order_number, Some(expected));
        }
    }

    #[tokio::test]
    async fn test_buy_with_insufficient_stock_writes_nothing() {
        let node = node(1, &[2]).await;

        let (response, fan_out) = node.service.buy(buy("Fox", 2)).await.unwrap();
        assert!(!response.success);
        assert_eq!(
            response.error_message.as_deref(),
            Some("Fox's stock is less than desired quantity.")
        );
        assert!(fan_out.is_none());
        assert_eq!(node.service.log().max_key().await.unwrap(), 0);
        assert!(node.peers[0].records().is_empty());
    }

    #[tokio::test]
    async fn test_buy_unknown_product() {
        let node = node(1, &[]).await;
        let (response, _) = node.service.buy(buy("Whale", 1)).await.unwrap();
        assert_eq!(
            response.error_message.as_deref(),
            Some("Whale does not exist in catalog.")
        );
    }

    #[tokio::test]
    async fn test_buy_rejects_invalid_request() {
        let node = node(1, &[]).await;
        let err = node.service.buy(buy("", 1)).await.err().unwrap();
        assert!(matches!(err, OrderError::InvalidArgument { .. }));
        let err = node.service.buy(buy("Tux", 0)).await.err().unwrap();
        assert!(matches!(err, OrderError::InvalidArgument { .. }));
        assert_eq!(node.catalog.stock_of("Tux"), Some(10));
    }

    #[tokio::test]
    async fn test_buy_with_dead_peer_still_succeeds() {
        let node = node(1, &[2, 3]).await;
        node.peers[0].set_up(false);

        let (response, fan_out) = node.service.buy(buy("Tux", 2)).await.unwrap();
        assert!(response.success);
        let report = fan_out.unwrap().run().await;
        assert_eq!(report.failed, vec![2]);
        assert_eq!(report.accepted, vec![3]);

        let active: Vec<NodeId> = node
            .service
            .registry()
            .active_peers()
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(active, vec![3]);
    }

    #[tokio::test]
    async fn test_strict_buy_requires_leadership() {
        let node = node_with(
            2,
            &[1, 3],
            Arc::new(MemoryOrderLog::new()),
            ServiceOptions {
                strict_buy: true,
                ..ServiceOptions::default()
            },
        )
        .await;

        let err = node.service.buy(buy("Tux", 1)).await.err().unwrap();
        assert!(matches!(
            err,
            OrderError::NotLeader {
                self_id: 2,
                leader: None
            }
        ));
        assert_eq!(node.catalog.stock_of("Tux"), Some(10));

        node.service
            .assign_leader(LeaderAssignment {
                id: 2,
                host: "10.0.0.1".to_string(),
                port: 1702,
            })
            .await
            .unwrap();
        let (response, _) = node.service.buy(buy("Tux", 1)).await.unwrap();
        assert!(response.success);
    }

    /// Log whose inserts always fail.
    struct BrokenLog;

    impl OrderLog for BrokenLog {
        fn insert(
            &self,
            _record: OrderRecord,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
            Box::pin(async { anyhow::bail!("disk full") })
        }

        fn insert_batch(
            &self,
            _records: Vec<OrderRecord>,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<usize>> + Send + '_>> {
            Box::pin(async { anyhow::bail!("disk full") })
        }

        fn get(
            &self,
            _order_number: i64,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<OrderRecord>>> + Send + '_>>
        {
            Box::pin(async { Ok(None) })
        }

        fn range_after(
            &self,
            _order_number: i64,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<OrderRecord>>> + Send + '_>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn max_key(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<i64>> + Send + '_>> {
            Box::pin(async { Ok(0) })
        }
    }

    #[tokio::test]
    async fn test_failed_commit_restocks() {
        let node = node_with(1, &[2], Arc::new(BrokenLog), ServiceOptions::default()).await;

        let err = node.service.buy(buy("Tux", 4)).await.err().unwrap();
        assert!(matches!(err, OrderError::Internal(_)));
        assert_eq!(node.catalog.stock_of("Tux"), Some(10));
        assert!(node.peers[0].records().is_empty());
    }

    #[tokio::test]
    async fn test_query_order_number() {
        let node = node(1, &[]).await;
        node.service.buy(buy("Tux", 2)).await.unwrap();

        let found = node
            .service
            .query_order_number(QueryOrderRequest { order_number: 1 })
            .await
            .unwrap();
        assert!(found.success);
        assert_eq!(found.order, Some(OrderRecord::new(1, "Tux", 2)));

        let missing = node
            .service
            .query_order_number(QueryOrderRequest { order_number: 42 })
            .await
            .unwrap();
        assert!(!missing.success);
        assert_eq!(
            missing.error_message.as_deref(),
            Some(ORDER_NOT_FOUND_MESSAGE)
        );
    }

    #[tokio::test]
    async fn test_check_health() {
        let node = node(1, &[]).await;
        let reply = node.service.check_health(HealthRequest::probe());
        assert_eq!(reply.message, "I am online!");
    }

    #[tokio::test]
    async fn test_assign_leader_messages() {
        let node = node(1, &[2]).await;

        let other = node
            .service
            .assign_leader(LeaderAssignment {
                id: 2,
                host: "10.0.0.1".to_string(),
                port: 1702,
            })
            .await
            .unwrap();
        assert_eq!(other.message, "Received the leader id: 2");
        assert_eq!(node.service.registry().current_leader(), Some(2));

        let me = node
            .service
            .assign_leader(LeaderAssignment {
                id: 1,
                host: "10.0.0.1".to_string(),
                port: 1701,
            })
            .await
            .unwrap();
        assert_eq!(me.message, "Received the leader id: 1, I am the leader!");
        assert!(node.service.registry().is_self_leader());
    }

    #[tokio::test]
    async fn test_assign_self_leader_resets_sequence() {
        let log = Arc::new(MemoryOrderLog::new());
        let node = node_with(1, &[], log.clone(), ServiceOptions::default()).await;
        // Records arriving behind the sequence's back.
        log.insert_batch(vec![
            OrderRecord::new(1, "Tux", 1),
            OrderRecord::new(2, "Fox", 1),
        ])
        .await
        .unwrap();

        node.service
            .assign_leader(LeaderAssignment {
                id: 1,
                host: "10.0.0.1".to_string(),
                port: 1701,
            })
            .await
            .unwrap();
        let (response, _) = node.service.buy(buy("Tux", 1)).await.unwrap();
        assert_eq!(response.order_number, Some(3));
    }

    #[tokio::test]
    async fn test_fetch_marks_requester_active() {
        let node = node(1, &[2, 3]).await;
        node.service.buy(buy("Tux", 1)).await.unwrap();
        node.service.buy(buy("Tux", 1)).await.unwrap();
        node.service
            .registry()
            .mark_status(3, NodeStatus::Offline);

        let response = node
            .service
            .fetch_all_orders_from(FetchAllOrdersRequest {
                requester_id: 3,
                after_order_number: 1,
            })
            .await
            .unwrap();
        assert_eq!(response.orders, vec![OrderRecord::new(2, "Tux", 1)]);
        assert_eq!(response.after_order_number, 1);
        assert_eq!(node.service.registry().active_peers().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_accept_keeps_one_copy() {
        let node = node(2, &[1]).await;
        let req = AcceptOrdersRequest {
            order: OrderRecord::new(1, "Tux", 2),
            requester_id: 1,
        };

        let first = node
            .service
            .accept_orders_from_leader(req.clone())
            .await
            .unwrap();
        assert!(first.success);
        let second = node.service.accept_orders_from_leader(req).await.unwrap();
        assert!(!second.success);
        assert_eq!(node.service.log().range_after(0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_accepted_orders_push_sequence_forward() {
        let node = node(2, &[1]).await;
        node.service
            .accept_orders_from_leader(AcceptOrdersRequest {
                order: OrderRecord::new(5, "Tux", 1),
                requester_id: 1,
            })
            .await
            .unwrap();
        let (response, _) = node.service.buy(buy("Tux", 1)).await.unwrap();
        assert_eq!(response.order_number, Some(6));
    }

    #[tokio::test]
    async fn test_tracked_fan_outs_drain_on_shutdown() {
        let node = node(1, &[2]).await;
        let tasks = FanOutTasks::default();

        let (_, fan_out) = node.service.buy(buy("Tux", 1)).await.unwrap();
        tasks.spawn(fan_out.unwrap());
        assert_eq!(tasks.drain(Duration::from_secs(2)).await, 0);
        assert_eq!(tasks.pending(), 0);
        assert_eq!(node.peers[0].records(), vec![OrderRecord::new(1, "Tux", 1)]);
    }

    #[tokio::test]
    async fn test_slow_fan_out_is_abandoned_after_grace() {
        let node = node(1, &[2]).await;
        node.peers[0].set_delay(Duration::from_secs(5));
        let tasks = FanOutTasks::default();

        let (_, fan_out) = node.service.buy(buy("Tux", 1)).await.unwrap();
        tasks.spawn(fan_out.unwrap());
        assert_eq!(tasks.pending(), 1);
        assert_eq!(tasks.drain(Duration::from_millis(10)).await, 1);
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_accept_at_top_of_key_range() {
        let node = node(2, &[1]).await;
        let accepted = node
            .service
            .accept_orders_from_leader(AcceptOrdersRequest {
                order: OrderRecord::new(i64::MAX, "Tux", 1),
                requester_id: 1,
            })
            .await
            .unwrap();
        assert!(accepted.success);
        assert_eq!(node.service.log().max_key().await.unwrap(), i64::MAX);

        // Nothing is left to mint: the buy fails and the stock comes back.
        let err = node.service.buy(buy("Tux", 3)).await.err().unwrap();
        assert!(matches!(err, OrderError::Internal(_)));
        assert_eq!(node.catalog.stock_of("Tux"), Some(10));
        assert_eq!(node.service.log().range_after(0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_starts_above_existing_log() {
        let log = Arc::new(MemoryOrderLog::new());
        log.insert(OrderRecord::new(7, "Tux", 1)).await.unwrap();
        let node = node_with(1, &[], log, ServiceOptions::default()).await;

        let status = node.service.status().await.unwrap();
        assert_eq!(status.max_order_number, 7);
        assert_eq!(status.next_order_number, 8);
        assert_eq!(status.mode, NodeMode::Follower);
        assert_eq!(status.nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_sync_then_buy_continues_numbering() {
        let node = node(1, &[2]).await;
        node.peers[0]
            .orders
            .lock()
            .unwrap()
            .insert(4, OrderRecord::new(4, "Tux", 3));

        let report = node.service.bootstrap_sync().await.unwrap();
        assert_eq!(report.inserted, 1);
        let (response, _) = node.service.buy(buy("Tux", 1)).await.unwrap();
        assert_eq!(response.order_number, Some(5));
    }
}
