//! orderstore library: a replicated, append-only order log service.
//!
//! Each node keeps its own durable order log and serves a small JSON RPC
//! surface. Buys are committed locally and then pushed to peers on a best
//! effort basis; a restarting node pulls what it missed from its peers.
//! Which node takes buys is decided by an external coordinator
//! ([`coordinator::LeaderCoordinator`]).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

pub mod catalog;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod orderlog;
pub mod rpc;
pub mod sequence;
pub mod server;
pub mod service;

use crate::catalog::http::HttpCatalog;
use crate::catalog::memory::MemoryCatalog;
use crate::catalog::Catalog;
use crate::cluster::{Address, HttpPeerClient, OrderNode, ReplicaRegistry};
use crate::config::Config;
use crate::orderlog::memory::MemoryOrderLog;
use crate::orderlog::sqlite::SqliteOrderLog;
use crate::orderlog::OrderLog;
use crate::service::{FanOutTasks, OrderService, ServiceOptions};

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// The node itself.
    pub service: Arc<OrderService>,
    /// Set once bootstrap sync has finished or been skipped.
    pub ready: AtomicBool,
    /// Replication spawned by buys, drained on shutdown.
    pub fan_outs: FanOutTasks,
}

// -- Startup ------------------------------------------------------------------

/// Open the order log selected by `order_log.engine`.
pub fn open_order_log(config: &Config) -> anyhow::Result<Arc<dyn OrderLog>> {
    match config.order_log.engine.as_str() {
        "memory" => {
            info!("In-memory order log initialized");
            Ok(Arc::new(MemoryOrderLog::new()))
        }
        "sqlite" => {
            let path = config.order_log.sqlite.path_for(config.node.id);
            if let Some(parent) = std::path::Path::new(&path).parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let log = SqliteOrderLog::new(&path, config.order_log.sqlite.read_connections)?;
            info!("SQLite order log initialized at {}", path);
            Ok(Arc::new(log))
        }
        other => anyhow::bail!("unknown order_log.engine '{other}' (expected sqlite or memory)"),
    }
}

/// Build the catalog collaborator selected by `catalog.backend`.
pub fn open_catalog(config: &Config) -> anyhow::Result<Arc<dyn Catalog>> {
    match config.catalog.backend.as_str() {
        "memory" => {
            let products = config.catalog.memory.products.clone();
            info!(products = products.len(), "In-memory catalog initialized");
            Ok(Arc::new(MemoryCatalog::new(products)))
        }
        "http" => {
            let http = &config.catalog.http;
            let catalog = HttpCatalog::new(
                &http.url,
                std::time::Duration::from_millis(http.timeout_ms),
            )?;
            info!("HTTP catalog at {}", http.url);
            Ok(Arc::new(catalog))
        }
        other => anyhow::bail!("unknown catalog.backend '{other}' (expected http or memory)"),
    }
}

/// HTTP-backed nodes for every configured peer.
pub fn peer_nodes(config: &Config) -> anyhow::Result<Vec<OrderNode>> {
    config
        .peers
        .iter()
        .map(|peer| {
            let address = Address::new(peer.host.clone(), peer.port);
            let client = HttpPeerClient::new(
                &address,
                config.replication.rpc_timeout(),
                config.replication.health_timeout(),
            )?;
            Ok(OrderNode::new(peer.id, address, Arc::new(client)))
        })
        .collect()
}

/// Assemble the node's shared state around an opened log and catalog.
pub async fn build_state(
    config: Config,
    log: Arc<dyn OrderLog>,
    catalog: Arc<dyn Catalog>,
) -> anyhow::Result<Arc<AppState>> {
    let self_id = config.node.id;
    let nodes = peer_nodes(&config)?;
    if !nodes.iter().any(|n| n.id == self_id) {
        warn!(self_id, "This node is not in the configured peer list");
    }
    let registry = Arc::new(ReplicaRegistry::new(self_id, nodes));

    let options = ServiceOptions {
        rpc_timeout: config.replication.rpc_timeout(),
        max_parallel_rpcs: config.replication.max_parallel_rpcs,
        strict_buy: config.leader.strict_buy,
    };
    let service = OrderService::open(log, registry, catalog, options).await?;

    Ok(Arc::new(AppState {
        config,
        service: Arc::new(service),
        ready: AtomicBool::new(false),
        fan_outs: FanOutTasks::default(),
    }))
}

/// Run bootstrap sync in the background and flip `ready` when it is done.
///
/// A failed sync is logged and still marks the node ready: the node serves
/// with whatever its log holds.
pub fn start_bootstrap_sync(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if state.config.replication.bootstrap_sync {
            if let Err(e) = state.service.bootstrap_sync().await {
                error!("Bootstrap sync failed: {e:#}");
            }
        } else {
            info!("Bootstrap sync disabled");
        }
        state.ready.store(true, Ordering::Release);
    })
}
