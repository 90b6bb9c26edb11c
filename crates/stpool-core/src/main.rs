//! stpool demo binary: wires the simulated chain to a registry and pool
//! and keeps the service alive until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use stpool_chain::{ManualEpoch, SimChain};
use stpool_common::{Address, ProtocolConfig};
use stpool_core::StakePool;
use stpool_registry::NodeOperatorRegistry;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "stpool", about = "Pooled staking accounting service", version)]
struct Cli {
    /// Path to a ProtocolConfig JSON file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Admin address for both registry and pool
    #[arg(long, default_value = "0x0000000000000000000000000000000000000001")]
    admin: Address,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ProtocolConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ProtocolConfig {
            pool: Default::default(),
            registry: Default::default(),
        },
    };

    info!("Starting stpool service...");

    let chain = Arc::new(SimChain::new());
    let epoch = Arc::new(ManualEpoch::new(0));
    let registry = Arc::new(NodeOperatorRegistry::new(
        cli.admin,
        config.registry.clone(),
        chain.clone(),
    ));
    let pool = StakePool::new(
        cli.admin,
        Address::from_low_u64(u64::MAX),
        config.pool.clone(),
        registry.clone(),
        chain,
        epoch,
    );

    info!(
        buffered = pool.total_buffered().await,
        operators = registry.stats().await.total,
        "stpool service started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down stpool service...");
    Ok(())
}
