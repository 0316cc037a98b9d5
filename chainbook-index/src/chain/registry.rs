use std::{collections::BTreeMap, sync::Arc};

use super::{BitcoinParser, BitcoindBackend, ChainBackend, ChainParser};
use crate::{config::CoinConfig, error::ConfigSnafu, Result};

pub type ParserCtor = fn(&CoinConfig) -> Result<Arc<dyn ChainParser>>;
pub type BackendCtor = fn(&CoinConfig, Arc<dyn ChainParser>) -> Result<Arc<dyn ChainBackend>>;

fn bitcoin_parser(config: &CoinConfig) -> Result<Arc<dyn ChainParser>> {
    Ok(Arc::new(BitcoinParser::new(config.network)))
}

fn bitcoind_backend(
    config: &CoinConfig,
    parser: Arc<dyn ChainParser>,
) -> Result<Arc<dyn ChainBackend>> {
    Ok(Arc::new(BitcoindBackend::new(config, parser)?))
}

/// Maps a configured coin name to the parser and backend that serve it.
/// Built once at startup and only read afterwards.
pub struct CoinRegistry {
    coins: BTreeMap<String, (ParserCtor, BackendCtor)>,
}

impl CoinRegistry {
    pub fn new() -> Self {
        Self {
            coins: BTreeMap::new(),
        }
    }

    /// Registry with every coin this build supports.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for name in ["bitcoin", "bitcoin_testnet", "bitcoin_signet", "bitcoin_regtest"] {
            registry.register(name, bitcoin_parser, bitcoind_backend);
        }
        registry
    }

    pub fn register(&mut self, coin_name: &str, parser: ParserCtor, backend: BackendCtor) {
        self.coins
            .insert(coin_name.to_lowercase(), (parser, backend));
    }

    pub fn supports(&self, coin_name: &str) -> bool {
        self.coins.contains_key(&coin_name.to_lowercase())
    }

    /// Builds the parser and backend for `config.coin_name`.
    pub fn resolve(
        &self,
        config: &CoinConfig,
    ) -> Result<(Arc<dyn ChainParser>, Arc<dyn ChainBackend>)> {
        let (parser_ctor, backend_ctor) = self
            .coins
            .get(&config.coin_name.to_lowercase())
            .ok_or_else(|| {
                ConfigSnafu {
                    msg: format!("unsupported coin {}", config.coin_name),
                }
                .build()
            })?;
        let parser = parser_ctor(config)?;
        let backend = backend_ctor(config, Arc::clone(&parser))?;
        Ok((parser, backend))
    }
}

impl Default for CoinRegistry {
    fn default() -> Self {
        Self::new()
    }
}
