//! Replication engine: bootstrap sync and leader fan-out.
//!
//! Replication here is best-effort by construction. There is no quorum and
//! no commit barrier: a buy is committed once it is in the local log, and
//! the fan-out that follows may reach all, some, or none of the followers.
//! A follower that misses a record catches up on its next bootstrap sync,
//! or never, if every peer that had the record is unreachable by then.
//!
//! Every peer call is bounded by an explicit deadline, and any failed call
//! marks that peer OFFLINE in the local registry. Nothing is retried.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::client::{with_deadline, PeerError};
use super::node::{NodeId, NodeStatus};
use super::registry::ReplicaRegistry;
use crate::metrics::{ORDER_LOG_MAX_KEY, REPLICATION_RPCS_TOTAL, SYNC_RECORDS_INSERTED_TOTAL};
use crate::orderlog::{OrderLog, OrderRecord};
use crate::rpc::{AcceptOrdersRequest, FetchAllOrdersRequest};
use crate::sequence::OrderSequence;

/// Outcome of one bootstrap sync pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Active peers asked for records.
    pub contacted: usize,
    /// Peers that answered, ascending.
    pub responded: Vec<NodeId>,
    /// Peers that failed and were marked OFFLINE, ascending.
    pub failed: Vec<NodeId>,
    /// Records received across all responses, before deduplication.
    pub received: usize,
    /// Records newly written to the local log.
    pub inserted: usize,
    /// Order numbers that arrived with differing contents.
    pub conflicts: usize,
    /// Local max key after the pass.
    pub max_key: i64,
}

/// Outcome of pushing one record to the followers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutReport {
    /// Peers that stored the record.
    pub accepted: Vec<NodeId>,
    /// Peers that answered but already had the key.
    pub duplicates: Vec<NodeId>,
    /// Peers that could not be reached and were marked OFFLINE.
    pub failed: Vec<NodeId>,
}

/// Pulls missing records from peers and pushes new ones out to them.
#[derive(Clone)]
pub struct Replicator {
    registry: Arc<ReplicaRegistry>,
    log: Arc<dyn OrderLog>,
    sequence: Arc<OrderSequence>,
    rpc_timeout: Duration,
    limiter: Arc<Semaphore>,
}

impl Replicator {
    pub fn new(
        registry: Arc<ReplicaRegistry>,
        log: Arc<dyn OrderLog>,
        sequence: Arc<OrderSequence>,
        rpc_timeout: Duration,
        max_parallel_rpcs: usize,
    ) -> Self {
        Self {
            registry,
            log,
            sequence,
            rpc_timeout,
            limiter: Arc::new(Semaphore::new(max_parallel_rpcs.max(1))),
        }
    }

    /// Fetch every record above the local max key from all active peers,
    /// merge, and insert what is missing.
    ///
    /// Peers that fail are marked OFFLINE and left out of the merge. The
    /// order number generator is reset above the resulting max key.
    pub async fn bootstrap_sync(&self) -> anyhow::Result<SyncReport> {
        let self_id = self.registry.self_id();
        let peers = self.registry.active_peers();
        let local_max = self.log.max_key().await?;

        if peers.is_empty() {
            info!(self_id, "No active peers, skipping bootstrap sync");
            return Ok(SyncReport {
                max_key: local_max,
                ..SyncReport::default()
            });
        }

        info!(
            self_id,
            peers = peers.len(),
            after = local_max,
            "Starting bootstrap sync"
        );

        let mut calls = JoinSet::new();
        for peer in peers {
            let limiter = Arc::clone(&self.limiter);
            let deadline = self.rpc_timeout;
            let req = FetchAllOrdersRequest {
                requester_id: self_id,
                after_order_number: local_max,
            };
            calls.spawn(async move {
                let _permit = limiter.acquire_owned().await.ok();
                let address = peer.address.to_string();
                let result =
                    with_deadline(&address, deadline, peer.client.fetch_all_orders_from(req))
                        .await;
                (peer.id, result)
            });
        }

        let mut report = SyncReport {
            contacted: calls.len(),
            ..SyncReport::default()
        };
        let mut responses = Vec::new();
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((peer, Ok(response))) => {
                    info!(peer, records = response.orders.len(), "Received records from peer");
                    counter!(REPLICATION_RPCS_TOTAL, "kind" => "fetch", "outcome" => "ok")
                        .increment(1);
                    report.received += response.orders.len();
                    report.responded.push(peer);
                    responses.push((peer, response.orders));
                }
                Ok((peer, Err(e))) => {
                    self.peer_failed(peer, "fetch", &e);
                    report.failed.push(peer);
                }
                Err(e) => error!("Bootstrap sync task failed: {e}"),
            }
        }
        report.responded.sort_unstable();
        report.failed.sort_unstable();

        let (merged, conflicts) = merge_records(responses);
        report.conflicts = conflicts;
        report.inserted = self.log.insert_batch(merged).await?;

        report.max_key = self.log.max_key().await?;
        let next = self.sequence.reset_above(report.max_key);
        counter!(SYNC_RECORDS_INSERTED_TOTAL).increment(report.inserted as u64);
        gauge!(ORDER_LOG_MAX_KEY).set(report.max_key as f64);

        info!(
            self_id,
            responded = report.responded.len(),
            failed = report.failed.len(),
            inserted = report.inserted,
            conflicts = report.conflicts,
            max_key = report.max_key,
            next_order_number = next,
            "Bootstrap sync finished"
        );
        Ok(report)
    }

    /// Push `record` to every active peer and wait for their answers.
    ///
    /// Failures only mark the peer OFFLINE; the local commit stands.
    pub async fn fan_out(&self, record: &OrderRecord) -> FanOutReport {
        let self_id = self.registry.self_id();
        let peers = self.registry.active_peers();
        let mut report = FanOutReport::default();
        if peers.is_empty() {
            debug!(order_number = record.order_number, "No active peers to replicate to");
            return report;
        }

        debug!(
            order_number = record.order_number,
            peers = peers.len(),
            "Replicating order to peers"
        );

        let mut calls = JoinSet::new();
        for peer in peers {
            let limiter = Arc::clone(&self.limiter);
            let deadline = self.rpc_timeout;
            let req = AcceptOrdersRequest {
                order: record.clone(),
                requester_id: self_id,
            };
            calls.spawn(async move {
                let _permit = limiter.acquire_owned().await.ok();
                let address = peer.address.to_string();
                let result =
                    with_deadline(&address, deadline, peer.client.accept_orders_from_leader(req))
                        .await;
                (peer.id, result)
            });
        }

        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((peer, Ok(response))) if response.success => {
                    counter!(REPLICATION_RPCS_TOTAL, "kind" => "accept", "outcome" => "ok")
                        .increment(1);
                    report.accepted.push(peer);
                }
                Ok((peer, Ok(_))) => {
                    debug!(peer, order_number = record.order_number, "Peer already had order");
                    counter!(REPLICATION_RPCS_TOTAL, "kind" => "accept", "outcome" => "duplicate")
                        .increment(1);
                    report.duplicates.push(peer);
                }
                Ok((peer, Err(e))) => {
                    self.peer_failed(peer, "accept", &e);
                    report.failed.push(peer);
                }
                Err(e) => error!("Fan-out task failed: {e}"),
            }
        }
        report.accepted.sort_unstable();
        report.duplicates.sort_unstable();
        report.failed.sort_unstable();
        report
    }

    fn peer_failed(&self, peer: NodeId, kind: &'static str, err: &PeerError) {
        warn!(peer, kind, "Replication call failed: {err}");
        counter!(REPLICATION_RPCS_TOTAL, "kind" => kind, "outcome" => "failed").increment(1);
        self.registry.mark_status(peer, NodeStatus::Offline);
    }
}

/// Merge per-peer responses into one list ordered by order number.
///
/// Identical records collapse into one. When two peers disagree about the
/// contents of the same order number, the record from the lowest peer id
/// wins and the clash is counted.
pub fn merge_records(mut responses: Vec<(NodeId, Vec<OrderRecord>)>) -> (Vec<OrderRecord>, usize) {
    responses.sort_by_key(|(peer, _)| *peer);

    let mut merged: BTreeMap<i64, (NodeId, OrderRecord)> = BTreeMap::new();
    let mut conflicts = 0;
    for (peer, records) in responses {
        for record in records {
            match merged.entry(record.order_number) {
                Entry::Vacant(slot) => {
                    slot.insert((peer, record));
                }
                Entry::Occupied(slot) => {
                    let (kept_from, kept) = slot.get();
                    if *kept != record {
                        conflicts += 1;
                        warn!(
                            order_number = record.order_number,
                            kept_from = *kept_from,
                            dropped_from = peer,
                            "Peers disagree on order contents: kept {:?}, dropped {:?}",
                            kept,
                            record
                        );
                    }
                }
            }
        }
    }
    (merged.into_values().map(|(_, r)| r).collect(), conflicts)
}
