use serde::{Deserialize, Serialize};

use super::{tx::Tx, BlockHash, Txid};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub hash: BlockHash,
    pub prev_hash: BlockHash,
    pub height: u32,
    pub time: i64,
    pub size: u32,
}

/// Thin block shape: header plus the ordered txids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub header: BlockHeader,
    pub txids: Vec<Txid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Tx>,
}

impl Block {
    pub fn hash(&self) -> BlockHash {
        self.header.hash
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }
}

/// Value of the height column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeightInfo {
    pub hash: BlockHash,
    pub time: i64,
    pub tx_count: u32,
    pub size: u32,
}

/// Where a confirmed transaction lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLocation {
    pub height: u32,
    pub position: u32,
}
