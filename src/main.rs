//! orderstore -- one node of the replicated order service.
//!
//! Crash-only design: every startup is a recovery. The order log is opened,
//! the server starts answering immediately, and bootstrap sync pulls missed
//! records from peers in the background. SIGTERM/SIGINT only stop accepting
//! connections and give in-flight requests a bounded time to finish.

use std::future::IntoFuture;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use orderstore::cluster::NodeId;

/// Command-line arguments for an order-service node.
#[derive(Parser, Debug)]
#[command(
    name = "orderstore",
    version,
    about = "Replicated order-log service node"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "orderstore.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,

    /// Override this node's id.
    #[arg(long, env = "SELF_ID")]
    node_id: Option<NodeId>,

    /// Override the SQLite order log path.
    #[arg(long)]
    order_log: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = orderstore::config::load_config(&cli.config)?;
    if let Some(id) = cli.node_id {
        config.node.id = id;
    }
    if let Some(path) = cli.order_log {
        config.order_log.sqlite.path = Some(path);
    }

    init_tracing(&config.logging);
    info!("Loaded configuration from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        orderstore::metrics::init_metrics();
        orderstore::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let log = orderstore::open_order_log(&config)?;
    let catalog = orderstore::open_catalog(&config)?;
    let state = orderstore::build_state(config, log, catalog).await?;
    info!(
        node_id = state.config.node.id,
        peers = state.config.peers.len(),
        "Order service node ready to start"
    );

    let shutdown_timeout = state.config.server.shutdown_timeout;
    let app = orderstore::server::app(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("orderstore listening on {}", bind_addr);

    orderstore::start_bootstrap_sync(state.clone());

    // In-flight requests get `shutdown_timeout` seconds after the signal.
    let grace = Duration::from_secs(shutdown_timeout);
    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });
    let drained = tokio::select! {
        result = server.into_future() => {
            result?;
            true
        }
        _ = async {
            let _ = stop_rx.wait_for(|stopping| *stopping).await;
            tokio::time::sleep(grace).await;
        } => {
            warn!("In-flight requests still running after {}s, exiting", grace.as_secs());
            false
        }
    };

    // Replication for already answered buys gets the same grace.
    let fan_out_grace = if drained { grace } else { Duration::ZERO };
    state.fan_outs.drain(fan_out_grace).await;

    info!("orderstore shut down");

    Ok(())
}

/// `RUST_LOG` wins over `logging.level`; `logging.format: json` switches
/// to the JSON formatter.
fn init_tracing(logging: &orderstore::config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
