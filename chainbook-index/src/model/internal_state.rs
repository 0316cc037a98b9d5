use serde::{Deserialize, Serialize};

use super::BlockHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbState {
    Closed,
    Open,
    Inconsistent,
}

/// Persisted single-row state. Advanced in the same batch as every block write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalState {
    pub coin: String,
    pub schema_version: u32,
    pub db_state: DbState,
    pub best_height: Option<u32>,
    pub best_hash: Option<BlockHash>,
    pub start_height: u32,
}

impl InternalState {
    pub fn new(coin: &str, schema_version: u32, start_height: u32) -> Self {
        Self {
            coin: coin.to_string(),
            schema_version,
            db_state: DbState::Open,
            best_height: None,
            best_hash: None,
            start_height,
        }
    }

    pub fn tip(&self) -> Option<(u32, BlockHash)> {
        self.best_height.zip(self.best_hash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    Synced,
    Syncing,
    Error,
}

/// Runtime status shared between the follower, the mempool and the query
/// layer. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub initial_sync: bool,
    pub best_height: Option<u32>,
    pub best_hash: Option<BlockHash>,
    pub backend_height: Option<u32>,
    pub last_block_time: Option<i64>,
    pub last_sync_time: Option<i64>,
    pub last_error: Option<String>,
    pub mempool_size: usize,
    pub mempool_healthy: bool,
    pub fiat_last_ticker: Option<i64>,
    pub fiat_first_ticker: Option<i64>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Syncing,
            initial_sync: true,
            best_height: None,
            best_hash: None,
            backend_height: None,
            last_block_time: None,
            last_sync_time: None,
            last_error: None,
            mempool_size: 0,
            mempool_healthy: true,
            fiat_last_ticker: None,
            fiat_first_ticker: None,
        }
    }
}
