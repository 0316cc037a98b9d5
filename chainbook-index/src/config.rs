use std::{fs, path::Path, time::Duration};

use log::debug;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::{
    chain::Network,
    error::{ConfigParseSnafu, ConfigReadSnafu, ConfigSnafu},
    Result,
};

pub const RPC_USER_ENV: &str = "CHAINBOOK_RPC_USER";
pub const RPC_PASS_ENV: &str = "CHAINBOOK_RPC_PASS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FiatRatesConfig {
    pub provider_url: String,
    /// Provider id of the coin, e.g. `bitcoin`.
    pub coin_id: String,
    pub vs_currencies: Vec<String>,
    pub period_secs: u64,
    /// Platform whose token contracts are priced, e.g. `ethereum`.
    pub platform_id: Option<String>,
    pub platform_vs_currency: Option<String>,
    /// Token contract addresses priced on `platform_id`.
    pub tokens: Vec<String>,
    /// Pause between historical requests.
    pub throttle_millis: u64,
    /// Back-off applied after a rate-limit response.
    pub rate_limit_backoff_secs: u64,
    /// First day fetched when the ticker column is empty, `YYYY-MM-DD`.
    pub history_start: String,
}

impl Default for FiatRatesConfig {
    fn default() -> Self {
        Self {
            provider_url: "https://api.coingecko.com/api/v3".to_string(),
            coin_id: String::new(),
            vs_currencies: vec!["usd".to_string(), "eur".to_string()],
            period_secs: 900,
            platform_id: None,
            platform_vs_currency: None,
            tokens: Vec::new(),
            throttle_millis: 100,
            rate_limit_backoff_secs: 60,
            history_start: "2013-04-28".to_string(),
        }
    }
}

/// Per-coin configuration, loaded once at startup from the blockchain config
/// file and frozen afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoinConfig {
    pub coin_name: String,
    pub coin_shortcut: String,
    pub network: Network,
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_pass: String,
    pub rpc_timeout_secs: u64,
    /// `host:port` of the line-oriented block/tx notification listener.
    pub notify_endpoint: Option<String>,
    /// Fetch raw block bytes and parse locally instead of the node's JSON.
    pub parse_blocks: bool,
    pub sync_workers: usize,
    /// Catch-up runs the parallel pipeline only when more blocks than this
    /// are missing.
    pub sync_chunk: u32,
    pub mempool_workers: usize,
    pub mempool_refresh_secs: u64,
    pub mempool_max_deferred_attempts: u32,
    pub start_height: u32,
    pub max_reorg_depth: u32,
    pub store_raw_txs: bool,
    pub tx_cache_size: usize,
    pub poll_interval_secs: u64,
    pub fiat_rates: Option<FiatRatesConfig>,
}

impl Default for CoinConfig {
    fn default() -> Self {
        Self {
            coin_name: String::new(),
            coin_shortcut: String::new(),
            network: Network::Mainnet,
            rpc_url: String::new(),
            rpc_user: String::new(),
            rpc_pass: String::new(),
            rpc_timeout_secs: 25,
            notify_endpoint: None,
            parse_blocks: true,
            sync_workers: 8,
            sync_chunk: 100,
            mempool_workers: 8,
            mempool_refresh_secs: 10,
            mempool_max_deferred_attempts: 5,
            start_height: 0,
            max_reorg_depth: 100,
            store_raw_txs: false,
            tx_cache_size: 10_000,
            poll_interval_secs: 10,
            fiat_rates: None,
        }
    }
}

impl CoinConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let path_str = path.display().to_string();
        let raw = fs::read_to_string(path).context(ConfigReadSnafu { path: &path_str })?;
        let config: CoinConfig =
            serde_json::from_str(&raw).context(ConfigParseSnafu { path: &path_str })?;
        debug!("Loaded coin config for {} from {path_str}", config.coin_name);
        Ok(config)
    }

    /// Secrets from the environment take precedence over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(user) = std::env::var(RPC_USER_ENV) {
            self.rpc_user = user;
        }
        if let Ok(pass) = std::env::var(RPC_PASS_ENV) {
            self.rpc_pass = pass;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let missing = |field: &str| {
            ConfigSnafu {
                msg: format!("missing required field {field}"),
            }
            .fail()
        };
        if self.coin_name.is_empty() {
            return missing("coin_name");
        }
        if self.rpc_url.is_empty() {
            return missing("rpc_url");
        }
        if self.sync_workers == 0 || self.mempool_workers == 0 {
            return ConfigSnafu {
                msg: "sync_workers and mempool_workers must be at least 1",
            }
            .fail();
        }
        if self.max_reorg_depth == 0 {
            return ConfigSnafu {
                msg: "max_reorg_depth must be at least 1",
            }
            .fail();
        }
        if !self.store_raw_txs && self.tx_cache_size == 0 {
            return ConfigSnafu {
                msg: "tx_cache_size must be at least 1 when store_raw_txs is off",
            }
            .fail();
        }
        if let Some(fiat) = &self.fiat_rates {
            if fiat.provider_url.is_empty() || fiat.coin_id.is_empty() {
                return missing("fiat_rates.provider_url or fiat_rates.coin_id");
            }
            if fiat.period_secs == 0 {
                return ConfigSnafu {
                    msg: "fiat_rates.period_secs must be at least 1",
                }
                .fail();
            }
            if fiat.platform_id.is_some() != fiat.platform_vs_currency.is_some() {
                return ConfigSnafu {
                    msg: "fiat_rates.platform_id and platform_vs_currency go together",
                }
                .fail();
            }
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}
