use num::BigUint;
use serde::{Deserialize, Serialize};

/// Token amount attached to an output or input of an asset-capable chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub guid: u64,
    pub value: BigUint,
}

/// Asset definition as announced by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDefinition {
    pub guid: u64,
    pub symbol: String,
    pub precision: u8,
    pub max_supply: u64,
    pub metadata: String,
}

/// Stored asset row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub definition: AssetDefinition,
    pub created_height: u32,
    pub tx_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub transfers: u32,
    pub sent: BigUint,
    pub balance: BigUint,
}
