use async_trait::async_trait;
use num::BigUint;
use tokio::sync::broadcast;

use crate::{
    error::UnsupportedSnafu,
    model::{Block, BlockHash, BlockSummary, Tx, Txid},
    Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInfo {
    pub chain: String,
    pub blocks: u32,
    pub best_block_hash: BlockHash,
    pub version: String,
    pub initial_block_download: bool,
}

/// Optional capabilities of a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendFeatures {
    pub estimate_fee: bool,
    pub estimate_smart_fee: bool,
}

/// Push event from the node. The hash is carried when the channel provides it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    NewBlock(Option<BlockHash>),
    NewTx(Option<Txid>),
}

/// Access to the node the index follows. Every call is independent and
/// bounded by the backend's own deadline.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    async fn chain_info(&self) -> Result<ChainInfo>;

    /// Fails with `NotFound(Block)` above the backend tip.
    async fn block_hash(&self, height: u32) -> Result<BlockHash>;

    /// Header and txids only.
    async fn block_summary(&self, hash: &BlockHash) -> Result<BlockSummary>;

    /// Fully parsed block, decoded from the node's own representation.
    async fn block(&self, hash: &BlockHash, height: u32) -> Result<Block>;

    async fn block_bytes(&self, hash: &BlockHash) -> Result<Vec<u8>>;

    async fn tx(&self, txid: &Txid) -> Result<Tx>;

    async fn mempool_txids(&self) -> Result<Vec<Txid>>;

    async fn send_raw_transaction(&self, hex: &str) -> Result<Txid>;

    /// Fee rate in base units per kilobyte.
    async fn estimate_fee(&self, _blocks: u32) -> Result<BigUint> {
        UnsupportedSnafu { op: "estimate_fee" }.fail()
    }

    async fn estimate_smart_fee(&self, _blocks: u32, _conservative: bool) -> Result<BigUint> {
        UnsupportedSnafu {
            op: "estimate_smart_fee",
        }
        .fail()
    }

    fn features(&self) -> BackendFeatures;

    fn subscribe(&self) -> broadcast::Receiver<Notification>;

    /// Sending side of the push channel, when notifications are fed from
    /// outside the backend (e.g. the notify listener).
    fn notifier(&self) -> Option<broadcast::Sender<Notification>> {
        None
    }
}
