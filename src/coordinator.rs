//! Client-side leader election and request routing.
//!
//! The coordinator is not a node. It walks the configured node ids from
//! highest to lowest, picks the first one that answers a health check, and
//! tells it (and every lower node) that it is the leader. Buy and query
//! traffic then goes to that node until a call to it fails at the
//! transport level, which triggers a new election.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cluster::client::{with_deadline, OrderRpc, PeerError, RpcFuture};
use crate::cluster::{NodeId, OrderNode};
use crate::rpc::{
    BuyRequest, BuyResponse, HealthRequest, LeaderAssignment, QueryOrderRequest,
    QueryOrderResponse,
};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// No node answered a health check.
    #[error("no order-service node is reachable")]
    ClusterUnreachable,

    /// The leader answered but refused or garbled the call.
    #[error(transparent)]
    Peer(#[from] PeerError),
}

pub struct LeaderCoordinator {
    /// Descending by id; this is the election walk order.
    nodes: Vec<OrderNode>,
    health_timeout: Duration,
    rpc_timeout: Duration,
    leader: Mutex<Option<NodeId>>,
}

impl LeaderCoordinator {
    pub fn new(mut nodes: Vec<OrderNode>, health_timeout: Duration, rpc_timeout: Duration) -> Self {
        nodes.sort_by(|a, b| b.id.cmp(&a.id));
        nodes.dedup_by_key(|n| n.id);
        Self {
            nodes,
            health_timeout,
            rpc_timeout,
            leader: Mutex::new(None),
        }
    }

    pub async fn current_leader(&self) -> Option<NodeId> {
        *self.leader.lock().await
    }

    /// Run an election.
    ///
    /// `stale` names the leader the caller saw fail, or `None` if it saw no
    /// leader at all. If the coordinator has already moved on to a
    /// different leader the election is skipped and that leader is
    /// returned, so concurrent triggers elect only once.
    pub async fn elect(&self, stale: Option<NodeId>) -> Result<NodeId, CoordinatorError> {
        let mut leader = self.leader.lock().await;
        if let Some(current) = *leader {
            if stale != Some(current) {
                return Ok(current);
            }
        }

        let mut elected = None;
        for (position, node) in self.nodes.iter().enumerate() {
            let address = node.address.to_string();
            match with_deadline(
                &address,
                self.health_timeout,
                node.client.check_health(HealthRequest::probe()),
            )
            .await
            {
                Ok(_) => {
                    elected = Some(position);
                    break;
                }
                Err(e) => warn!(node = node.id, "Health check failed: {e}"),
            }
        }
        let Some(position) = elected else {
            *leader = None;
            return Err(CoordinatorError::ClusterUnreachable);
        };

        let chosen = &self.nodes[position];
        let assignment = LeaderAssignment {
            id: chosen.id,
            host: chosen.address.host.clone(),
            port: chosen.address.port,
        };
        for node in &self.nodes[position..] {
            let address = node.address.to_string();
            if let Err(e) = with_deadline(
                &address,
                self.rpc_timeout,
                node.client.assign_leader(assignment.clone()),
            )
            .await
            {
                warn!(node = node.id, leader = chosen.id, "Leader assignment not delivered: {e}");
            }
        }

        info!(leader = chosen.id, address = %chosen.address, "Leader elected");
        *leader = Some(chosen.id);
        Ok(chosen.id)
    }

    pub async fn buy(&self, req: BuyRequest) -> Result<BuyResponse, CoordinatorError> {
        self.route(|client| client.buy(req.clone())).await
    }

    pub async fn query(&self, order_number: i64) -> Result<QueryOrderResponse, CoordinatorError> {
        self.route(|client| client.query_order_number(QueryOrderRequest { order_number }))
            .await
    }

    /// Send a call to the leader, re-electing on transport failure.
    ///
    /// At most one attempt per configured node.
    async fn route<T, F>(&self, call: F) -> Result<T, CoordinatorError>
    where
        F: for<'a> Fn(&'a dyn OrderRpc) -> RpcFuture<'a, T>,
    {
        let current = self.current_leader().await;
        let mut leader = match current {
            Some(id) => id,
            None => self.elect(None).await?,
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let node = self
                .nodes
                .iter()
                .find(|n| n.id == leader)
                .ok_or(CoordinatorError::ClusterUnreachable)?;
            let address = node.address.to_string();
            match with_deadline(&address, self.rpc_timeout, call(node.client.as_ref())).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transport() && attempts < self.nodes.len() => {
                    warn!(leader, "Leader unreachable, re-electing: {e}");
                    leader = self.elect(Some(leader)).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::testing::FakePeer;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn cluster(ids: &[NodeId]) -> (LeaderCoordinator, Vec<Arc<FakePeer>>) {
        let peers: Vec<Arc<FakePeer>> = ids.iter().map(|&id| Arc::new(FakePeer::new(id))).collect();
        let nodes = peers.iter().map(|p| FakePeer::node(p.id, p.clone())).collect();
        let coordinator =
            LeaderCoordinator::new(nodes, Duration::from_millis(100), Duration::from_millis(200));
        (coordinator, peers)
    }

    fn peer(peers: &[Arc<FakePeer>], id: NodeId) -> &FakePeer {
        peers.iter().find(|p| p.id == id).unwrap()
    }

    #[tokio::test]
    async fn test_highest_healthy_node_wins() {
        let (coordinator, peers) = cluster(&[1, 2, 3]);
        assert_eq!(coordinator.elect(None).await.unwrap(), 3);
        assert_eq!(coordinator.current_leader().await, Some(3));

        // Only the elected node and the ones after it hear about it.
        for id in [1, 2, 3] {
            assert_eq!(*peer(&peers, id).assignments.lock().unwrap(), vec![3]);
        }
    }

    #[tokio::test]
    async fn test_dead_top_node_is_skipped() {
        let (coordinator, peers) = cluster(&[1, 2, 3]);
        peer(&peers, 3).set_up(false);

        assert_eq!(coordinator.elect(None).await.unwrap(), 2);
        assert!(peer(&peers, 3).assignments.lock().unwrap().is_empty());
        assert_eq!(*peer(&peers, 1).assignments.lock().unwrap(), vec![2]);
        // The walk stops at the first responder.
        assert_eq!(peer(&peers, 1).health_checks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_node_counts_as_dead() {
        let (coordinator, peers) = cluster(&[1, 2]);
        peer(&peers, 2).set_delay(Duration::from_secs(5));
        assert_eq!(coordinator.elect(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_cluster() {
        let (coordinator, peers) = cluster(&[1, 2]);
        for p in &peers {
            p.set_up(false);
        }
        assert!(matches!(
            coordinator.elect(None).await,
            Err(CoordinatorError::ClusterUnreachable)
        ));
        assert_eq!(coordinator.current_leader().await, None);
    }

    #[tokio::test]
    async fn test_stale_election_is_ignored() {
        let (coordinator, peers) = cluster(&[1, 2, 3]);
        coordinator.elect(None).await.unwrap();
        let checks = peer(&peers, 3).health_checks.load(Ordering::SeqCst);

        assert_eq!(coordinator.elect(Some(1)).await.unwrap(), 3);
        assert_eq!(peer(&peers, 3).health_checks.load(Ordering::SeqCst), checks);
    }

    #[tokio::test]
    async fn test_repeated_initial_election_walks_once() {
        let (coordinator, peers) = cluster(&[1, 2, 3]);
        assert_eq!(coordinator.elect(None).await.unwrap(), 3);
        assert_eq!(coordinator.elect(None).await.unwrap(), 3);

        assert_eq!(peer(&peers, 3).health_checks.load(Ordering::SeqCst), 1);
        for id in [1, 2, 3] {
            assert_eq!(*peer(&peers, id).assignments.lock().unwrap(), vec![3]);
        }
    }

    #[tokio::test]
    async fn test_concurrent_initial_elections_walk_once() {
        let (coordinator, peers) = cluster(&[1, 2, 3]);
        let (a, b) = tokio::join!(coordinator.elect(None), coordinator.elect(None));
        assert_eq!(a.unwrap(), 3);
        assert_eq!(b.unwrap(), 3);
        assert_eq!(peer(&peers, 3).health_checks.load(Ordering::SeqCst), 1);
        assert_eq!(*peer(&peers, 1).assignments.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_election_after_unreachable_cluster_walks_again() {
        let (coordinator, peers) = cluster(&[1, 2]);
        for p in &peers {
            p.set_up(false);
        }
        assert!(coordinator.elect(None).await.is_err());

        peer(&peers, 1).set_up(true);
        assert_eq!(coordinator.elect(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_buy_routes_to_leader() {
        let (coordinator, peers) = cluster(&[1, 2, 3]);
        let response = coordinator
            .buy(BuyRequest {
                name: "Tux".to_string(),
                quantity: 2,
            })
            .await
            .unwrap();
        assert_eq!(response.order_number, Some(1));
        assert_eq!(peer(&peers, 3).buys.load(Ordering::SeqCst), 1);
        assert_eq!(peer(&peers, 2).buys.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_leader_failure_triggers_reelection() {
        let (coordinator, peers) = cluster(&[1, 2, 3]);
        coordinator.elect(None).await.unwrap();
        peer(&peers, 3).set_up(false);

        let response = coordinator
            .buy(BuyRequest {
                name: "Tux".to_string(),
                quantity: 1,
            })
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(coordinator.current_leader().await, Some(2));
        assert_eq!(peer(&peers, 2).buys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_query_after_total_failure_is_unreachable() {
        let (coordinator, peers) = cluster(&[1, 2]);
        coordinator.elect(None).await.unwrap();
        for p in &peers {
            p.set_up(false);
        }
        assert!(matches!(
            coordinator.query(1).await,
            Err(CoordinatorError::ClusterUnreachable)
        ));
    }

    #[tokio::test]
    async fn test_query_reads_leader() {
        let (coordinator, peers) = cluster(&[1, 2]);
        peer(&peers, 2)
            .orders
            .lock()
            .unwrap()
            .insert(1, crate::orderlog::OrderRecord::new(1, "Tux", 2));

        let response = coordinator.query(1).await.unwrap();
        assert!(response.success);
        let missing = coordinator.query(9).await.unwrap();
        assert!(!missing.success);
    }
}
