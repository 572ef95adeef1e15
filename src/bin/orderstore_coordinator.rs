//! CLI entry point for orderstore-coordinator: elects a leader among the
//! configured order-service nodes and routes buys and queries to it.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use orderstore::coordinator::{CoordinatorError, LeaderCoordinator};
use orderstore::rpc::BuyRequest;

#[derive(Parser)]
#[command(
    name = "orderstore-coordinator",
    about = "Leader election and routing for orderstore nodes"
)]
struct Cli {
    /// Config file listing the nodes under `peers`.
    #[arg(long, default_value = "orderstore.example.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an election and print the leader id
    Elect,
    /// Place an order through the leader
    Buy {
        #[arg(long)]
        name: String,
        #[arg(long)]
        quantity: i32,
    },
    /// Look up an order through the leader
    Query {
        #[arg(long)]
        number: i64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let rc = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            match e.downcast_ref::<CoordinatorError>() {
                Some(CoordinatorError::ClusterUnreachable) => 2,
                _ => 1,
            }
        }
    };
    std::process::exit(rc);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = orderstore::config::load_config(&cli.config)?;
    let nodes = orderstore::peer_nodes(&config)?;
    if nodes.is_empty() {
        anyhow::bail!("no nodes configured under `peers` in {}", cli.config.display());
    }
    let coordinator = LeaderCoordinator::new(
        nodes,
        config.replication.health_timeout(),
        config.replication.rpc_timeout(),
    );

    match cli.command {
        Commands::Elect => {
            let leader = coordinator.elect(None).await?;
            println!("{}", leader);
        }
        Commands::Buy { name, quantity } => {
            let response = coordinator.buy(BuyRequest { name, quantity }).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Query { number } => {
            let response = coordinator.query(number).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}
