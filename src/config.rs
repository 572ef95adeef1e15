//! Configuration loading and types for the order service.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! node: networking, identity and peers, the order log, the catalog
//! collaborator, replication deadlines, and leader behaviour.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::cluster::NodeId;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// This node's identity.
    #[serde(default)]
    pub node: NodeConfig,

    /// Static cluster membership. May include this node.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    /// Order log settings.
    #[serde(default)]
    pub order_log: OrderLogConfig,

    /// Catalog collaborator settings.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Peer call deadlines and bootstrap behaviour.
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Leader behaviour.
    #[serde(default)]
    pub leader: LeaderConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probes).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Requests processed at once; the rest wait.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_id")]
    pub id: NodeId,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
        }
    }
}

/// One member of the static cluster.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeerConfig {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
}

/// Order log configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderLogConfig {
    /// Engine: `sqlite` or `memory`.
    #[serde(default = "default_order_log_engine")]
    pub engine: String,

    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for OrderLogConfig {
    fn default() -> Self {
        Self {
            engine: default_order_log_engine(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// SQLite-specific order log configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the database file. Derived from the node id when unset.
    #[serde(default)]
    pub path: Option<String>,

    /// Read-only connections kept next to the writer (0 = reads use the writer).
    #[serde(default = "default_read_connections")]
    pub read_connections: usize,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: None,
            read_connections: default_read_connections(),
        }
    }
}

impl SqliteConfig {
    /// Configured path, or `./data/orderlog_<id>.db`.
    pub fn path_for(&self, node_id: NodeId) -> String {
        self.path
            .clone()
            .unwrap_or_else(|| format!("./data/orderlog_{node_id}.db"))
    }
}

/// Catalog collaborator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Backend: `http` or `memory`.
    #[serde(default = "default_catalog_backend")]
    pub backend: String,

    #[serde(default)]
    pub http: HttpCatalogConfig,

    #[serde(default)]
    pub memory: MemoryCatalogConfig,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            backend: default_catalog_backend(),
            http: HttpCatalogConfig::default(),
            memory: MemoryCatalogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpCatalogConfig {
    /// Base URL of the catalog service.
    #[serde(default = "default_catalog_url")]
    pub url: String,

    #[serde(default = "default_catalog_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HttpCatalogConfig {
    fn default() -> Self {
        Self {
            url: default_catalog_url(),
            timeout_ms: default_catalog_timeout_ms(),
        }
    }
}

/// Stock seeded into the in-process catalog.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryCatalogConfig {
    #[serde(default)]
    pub products: HashMap<String, i64>,
}

/// Replication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationConfig {
    /// Deadline for every peer call except health checks.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Deadline for health checks.
    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,

    /// Peer calls in flight at once per sync or fan-out.
    #[serde(default = "default_max_parallel_rpcs")]
    pub max_parallel_rpcs: usize,

    /// Pull missing records from peers at startup.
    #[serde(default = "default_true")]
    pub bootstrap_sync: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_ms: default_rpc_timeout_ms(),
            health_timeout_ms: default_health_timeout_ms(),
            max_parallel_rpcs: default_max_parallel_rpcs(),
            bootstrap_sync: true,
        }
    }
}

impl ReplicationConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaderConfig {
    /// Refuse buys on nodes that do not believe themselves leader.
    #[serde(default)]
    pub strict_buy: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
///
/// Controls Prometheus metrics collection and the readiness probe.
/// Both are enabled by default.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable `/readyz`, which reports 503 until bootstrap sync finished.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1766
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_concurrent_requests() -> usize {
    50
}

fn default_node_id() -> NodeId {
    1
}

fn default_order_log_engine() -> String {
    "sqlite".to_string()
}

fn default_read_connections() -> usize {
    4
}

fn default_catalog_backend() -> String {
    "http".to_string()
}

fn default_catalog_url() -> String {
    "http://127.0.0.1:1765".to_string()
}

fn default_catalog_timeout_ms() -> u64 {
    5000
}

fn default_rpc_timeout_ms() -> u64 {
    5000
}

fn default_health_timeout_ms() -> u64 {
    1000
}

fn default_max_parallel_rpcs() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
