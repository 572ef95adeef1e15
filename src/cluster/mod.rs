//! Cluster membership, peer RPC, and replication.
//!
//! Membership is static: every node is configured up front and only its
//! locally observed status and mode change at runtime.

pub mod client;
pub mod node;
pub mod registry;
pub mod replication;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{HttpPeerClient, OrderRpc, PeerError};
pub use node::{Address, NodeId, NodeMode, NodeStatus, NodeView, OrderNode};
pub use registry::ReplicaRegistry;
pub use replication::{FanOutReport, Replicator, SyncReport};
