use num::BigUint;
use serde::{Deserialize, Serialize};

use super::{asset::AssetInfo, AddrDesc, OutPoint, Txid};

/// Input as resolved at connect time. A coinbase or unresolved input has an
/// empty descriptor and a zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub addr_desc: AddrDesc,
    pub value: BigUint,
    pub asset: Option<AssetInfo>,
}

impl TxInput {
    pub fn is_resolved(&self) -> bool {
        !(self.addr_desc.is_empty() && self.value == BigUint::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub addr_desc: AddrDesc,
    pub value: BigUint,
    pub spent: bool,
    pub asset: Option<AssetInfo>,
}

/// Per-transaction record capturing everything needed to undo its effects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxAddresses {
    pub height: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

/// One transaction of a block and the outpoints its non-coinbase inputs spend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTx {
    pub txid: Txid,
    pub inputs: Vec<OutPoint>,
}
