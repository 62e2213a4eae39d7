use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use lumino_node::config::{LogLevel, NodeConfig};
use lumino_node::ledger::{JsonRpcLedger, LedgerRpcConfig};
use lumino_node::logger;
use lumino_node::node::NodeAgent;

/// Lumino compute-provider node. Single purpose: register on the ledger,
/// follow the epoch phases, execute assigned training jobs. All protocol
/// configuration comes from the environment.
#[derive(Parser, Debug)]
#[command(name = "lumino-node", version)]
struct Cli {
    /// Set log level
    #[clap(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Override the NODE_DATA_DIR data directory
    #[clap(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = NodeConfig::from_env().context("loading node configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    logger::setup(&config.data_dir, cli.log_level.into())?;
    info!("Initializing Lumino Node v{}...", env!("CARGO_PKG_VERSION"));

    let ledger = Arc::new(
        JsonRpcLedger::connect(&config.rpc_url, LedgerRpcConfig::default())
            .await
            .context("connecting to the ledger gateway")?,
    );

    let compute_rating = config.compute_rating;
    let mut agent = NodeAgent::new(config, ledger).await?;
    info!("Lumino Node initialization complete");

    info!("Compute rating: {compute_rating}");
    agent.register().await?;

    let stop = agent.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            stop.store(true, Ordering::Relaxed);
        }
    });

    agent.run().await
}
