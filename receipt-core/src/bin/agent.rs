//! Process entry point: loads configuration, wires the core, and runs
//! the two cooperative ticks until shutdown.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use receipt_core::chain::{AllocationExchange, RedeemOutcome, RedemptionEntry, TransactionManager};
use receipt_core::config::Config;
use receipt_core::types::AllocationId;
use receipt_core::Core;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "receipt-core-agent")]
#[command(about = "Receipt collection and voucher redemption core")]
struct Cli {
    /// Configuration file path (TOML/YAML, extension-detected).
    #[arg(short, long, default_value = "receipt-core.toml")]
    config: String,
}

/// Placeholder on-chain collaborators: a real deployment wires these to
/// an `alloy` provider and signer, which is out of scope for this core
/// (key management for on-chain signing is a non-goal).
struct UnimplementedChain;

#[async_trait::async_trait]
impl AllocationExchange for UnimplementedChain {
    async fn allocations_redeemed(&self, _allocation: AllocationId) -> Result<bool> {
        anyhow::bail!("no AllocationExchange backend configured")
    }
}

#[async_trait::async_trait]
impl TransactionManager for UnimplementedChain {
    async fn redeem_many(&self, _batch: &[RedemptionEntry]) -> Result<RedeemOutcome> {
        anyhow::bail!("no TransactionManager backend configured")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    info!(config = %cli.config, "starting receipt-core-agent");

    let config = Config::load(&cli.config).await?;
    let chain = Arc::new(UnimplementedChain);
    let core = Core::new(&config, chain.clone(), chain).await?;

    let (collection_task, redemption_task) = core.spawn_ticks();

    tokio::select! {
        res = collection_task => {
            res?;
        }
        res = redemption_task => {
            res?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}
