//! Peer descriptors.
//!
//! An [`OrderNode`] is this process's *local belief* about one member of the
//! static cluster: where it lives, whether we last managed to reach it, and
//! whether we have been told it is the leader.  Two nodes may disagree about
//! a third; nothing here is cluster-wide truth.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::client::OrderRpc;

/// Identifier of an order-service node, unique within the static cluster.
pub type NodeId = u32;

/// Locally observed liveness of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Active,
    Offline,
}

/// Role a node has been assigned, as far as this process has been told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeMode {
    Leader,
    Follower,
}

/// Network location of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One member of the cluster together with the client used to reach it.
#[derive(Clone)]
pub struct OrderNode {
    pub id: NodeId,
    pub address: Address,
    pub status: NodeStatus,
    pub mode: NodeMode,
    pub client: Arc<dyn OrderRpc>,
}

impl OrderNode {
    /// A freshly configured node: assumed reachable, not yet a leader.
    pub fn new(id: NodeId, address: Address, client: Arc<dyn OrderRpc>) -> Self {
        Self {
            id,
            address,
            status: NodeStatus::Active,
            mode: NodeMode::Follower,
            client,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// Serializable view without the client handle.
    pub fn view(&self) -> NodeView {
        NodeView {
            id: self.id,
            address: self.address.to_string(),
            status: self.status,
            mode: self.mode,
        }
    }
}

impl fmt::Debug for OrderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderNode")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("status", &self.status)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// What `/status` reports for each known node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NodeView {
    pub id: NodeId,
    pub address: String,
    pub status: NodeStatus,
    pub mode: NodeMode,
}
