//! Configuration: the enumerated options from the persistence/gateway
//! contract plus the tick intervals, loaded the way `WalletConfig`
//! loads — a layered file-plus-env config, falling back to sane
//! defaults for local development.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Minimum per-voucher amount to consider for redemption (decimal string).
    pub voucher_redemption_threshold: String,
    /// Minimum total batch amount required to submit on-chain (decimal string).
    pub voucher_redemption_batch_threshold: String,
    /// Hard cap on vouchers per on-chain call and on DB-load window.
    pub voucher_redemption_max_batch_size: i64,
    /// Base URL of the gateway HTTP service.
    pub gateway_endpoint: String,
    /// Postgres connection string.
    pub database_url: String,
    /// Collection tick interval, seconds (spec default: 10).
    #[serde(default = "default_collection_interval_secs")]
    pub collection_interval_secs: u64,
    /// Redemption tick interval, seconds (spec default: 30).
    #[serde(default = "default_redemption_interval_secs")]
    pub redemption_interval_secs: u64,
}

fn default_collection_interval_secs() -> u64 {
    10
}

fn default_redemption_interval_secs() -> u64 {
    30
}

impl Config {
    pub async fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("RECEIPT_CORE").separator("__"))
            .build()
            .context("failed to build configuration")?;

        settings
            .try_deserialize()
            .context("failed to deserialize configuration")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            voucher_redemption_threshold: "0".to_string(),
            voucher_redemption_batch_threshold: "0".to_string(),
            voucher_redemption_max_batch_size: 100,
            gateway_endpoint: "http://localhost:7600".to_string(),
            database_url: "postgres://localhost/receipt_core".to_string(),
            collection_interval_secs: default_collection_interval_secs(),
            redemption_interval_secs: default_redemption_interval_secs(),
        }
    }
}
