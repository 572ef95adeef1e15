//! Replica registry: this node's view of the cluster.
//!
//! The registry owns every [`OrderNode`] and the id of the believed leader.
//! It is touched concurrently by RPC handlers (fetch marks requesters
//! ACTIVE, leader assignment) and by the replication engine (failed calls
//! mark peers OFFLINE), so all state sits behind one mutex and readers get
//! copies rather than references.

use std::collections::BTreeMap;
use std::sync::Mutex;

use metrics::gauge;
use tracing::{info, warn};

use super::node::{NodeId, NodeMode, NodeStatus, OrderNode};
use crate::metrics::PEERS_ACTIVE;

#[derive(Debug)]
struct Inner {
    current_leader: Option<NodeId>,
    nodes: BTreeMap<NodeId, OrderNode>,
}

/// Locally observed membership, liveness, and leadership.
#[derive(Debug)]
pub struct ReplicaRegistry {
    self_id: NodeId,
    inner: Mutex<Inner>,
}

impl ReplicaRegistry {
    /// Build the registry from the static node list (which may include self).
    pub fn new(self_id: NodeId, nodes: impl IntoIterator<Item = OrderNode>) -> Self {
        let nodes: BTreeMap<NodeId, OrderNode> = nodes.into_iter().map(|n| (n.id, n)).collect();
        let registry = Self {
            self_id,
            inner: Mutex::new(Inner {
                current_leader: None,
                nodes,
            }),
        };
        registry.publish_gauge(&registry.inner.lock().expect("mutex poisoned"));
        registry
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// Peers other than self that are not believed OFFLINE, ordered by id.
    pub fn active_peers(&self) -> Vec<OrderNode> {
        let inner = self.inner.lock().expect("mutex poisoned");
        inner
            .nodes
            .values()
            .filter(|n| n.id != self.self_id && n.is_active())
            .cloned()
            .collect()
    }

    /// Record a new liveness belief for `id`.
    ///
    /// Returns `true` when the status actually changed. Unknown ids are
    /// logged and ignored; membership is static.
    pub fn mark_status(&self, id: NodeId, status: NodeStatus) -> bool {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        let Some(node) = inner.nodes.get_mut(&id) else {
            warn!(node = id, "Status change for unknown node ignored");
            return false;
        };
        if node.status == status {
            return false;
        }
        node.status = status;
        match status {
            NodeStatus::Active => info!(node = id, "Peer marked ACTIVE"),
            NodeStatus::Offline => warn!(node = id, "Peer marked OFFLINE"),
        }
        self.publish_gauge(&inner);
        true
    }

    /// Record `id` as the current leader.
    ///
    /// The node's mode becomes LEADER if it is known. A previous leader is
    /// not demoted: modes are display state, `current_leader` is what counts.
    pub fn assign_leader(&self, id: NodeId) {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        inner.current_leader = Some(id);
        match inner.nodes.get_mut(&id) {
            Some(node) => node.mode = NodeMode::Leader,
            None => warn!(node = id, "Leader is not in the configured node list"),
        }
        info!(leader = id, self_id = self.self_id, "Leader assigned");
    }

    pub fn current_leader(&self) -> Option<NodeId> {
        self.inner.lock().expect("mutex poisoned").current_leader
    }

    /// Whether the last leader assignment named this node.
    pub fn is_self_leader(&self) -> bool {
        self.current_leader() == Some(self.self_id)
    }

    /// This node's role as derived from the last assignment.
    pub fn self_mode(&self) -> NodeMode {
        if self.is_self_leader() {
            NodeMode::Leader
        } else {
            NodeMode::Follower
        }
    }

    pub fn node(&self, id: NodeId) -> Option<OrderNode> {
        self.inner
            .lock()
            .expect("mutex poisoned")
            .nodes
            .get(&id)
            .cloned()
    }

    /// Copy of every known node, ordered by id.
    pub fn snapshot(&self) -> Vec<OrderNode> {
        self.inner
            .lock()
            .expect("mutex poisoned")
            .nodes
            .values()
            .cloned()
            .collect()
    }

    fn publish_gauge(&self, inner: &Inner) {
        let active = inner
            .nodes
            .values()
            .filter(|n| n.id != self.self_id && n.is_active())
            .count();
        gauge!(PEERS_ACTIVE).set(active as f64);
    }
}
