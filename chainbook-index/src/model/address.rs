use std::collections::BTreeMap;

use num::BigUint;
use serde::{Deserialize, Serialize};

use super::{
    asset::{AssetBalance, AssetInfo},
    Txid,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub height: u32,
    pub value: BigUint,
    pub asset: Option<AssetInfo>,
}

impl Utxo {
    fn sort_key(&self) -> (u32, &Txid, u32) {
        (self.height, &self.txid, self.vout)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddrBalance {
    pub txs: u32,
    pub sent: BigUint,
    pub balance: BigUint,
    /// Kept sorted by (height, txid, vout).
    pub utxos: Vec<Utxo>,
    pub assets: BTreeMap<u64, AssetBalance>,
}

impl AddrBalance {
    pub fn add_utxo(&mut self, utxo: Utxo) {
        let pos = self
            .utxos
            .partition_point(|u| u.sort_key() < utxo.sort_key());
        self.utxos.insert(pos, utxo);
    }

    pub fn remove_utxo(&mut self, txid: &Txid, vout: u32) -> Option<Utxo> {
        let pos = self
            .utxos
            .iter()
            .position(|u| &u.txid == txid && u.vout == vout)?;
        Some(self.utxos.remove(pos))
    }

    pub fn utxo_sum(&self) -> BigUint {
        self.utxos.iter().map(|u| &u.value).sum()
    }
}

/// Which side of a transaction touched an address, and at what index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IoRef {
    Output(u32),
    Input(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrIndexEntry {
    /// Position of the transaction inside its block.
    pub tx_index: u32,
    pub io: IoRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxDirection {
    Input,
    Output,
    Both,
}

impl TxDirection {
    pub fn merge(self, other: TxDirection) -> TxDirection {
        if self == other {
            self
        } else {
            TxDirection::Both
        }
    }
}

impl From<IoRef> for TxDirection {
    fn from(io: IoRef) -> Self {
        match io {
            IoRef::Output(_) => TxDirection::Output,
            IoRef::Input(_) => TxDirection::Input,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub txid: Txid,
    /// `None` for unconfirmed transactions.
    pub height: Option<u32>,
    pub direction: TxDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub items: Vec<HistoryItem>,
    /// Opaque continuation token, `None` when the history is exhausted.
    pub next: Option<String>,
}
