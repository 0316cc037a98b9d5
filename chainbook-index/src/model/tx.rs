use std::fmt;

use num::BigUint;
use serde::{Deserialize, Serialize};

use super::{asset::AssetInfo, Txid};

/// Canonical address descriptor produced by a chain parser. Empty means the
/// output carries no indexable address.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AddrDesc(pub Vec<u8>);

impl AddrDesc {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for AddrDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AddrDesc({})", hex::encode(&self.0))
    }
}

impl From<Vec<u8>> for AddrDesc {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Txid,
    pub vout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vin {
    /// Funding output, `None` for a coinbase input.
    pub prev: Option<OutPoint>,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl Vin {
    pub fn is_coinbase(&self) -> bool {
        self.prev.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vout {
    pub value: BigUint,
    pub n: u32,
    pub script: Vec<u8>,
    pub asset: Option<AssetInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub txid: Txid,
    pub version: i32,
    pub lock_time: u32,
    pub vin: Vec<Vin>,
    pub vout: Vec<Vout>,
    /// Raw bytes as received from the backend.
    #[serde(with = "hex_bytes")]
    pub raw: Vec<u8>,
}

impl Tx {
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].is_coinbase()
    }
}

/// A transaction as returned by the query layer, with confirmation context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxDetail {
    pub tx: Tx,
    pub block_height: Option<u32>,
    pub block_time: Option<i64>,
    pub confirmations: u32,
}

mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(de::Error::custom)
    }
}
