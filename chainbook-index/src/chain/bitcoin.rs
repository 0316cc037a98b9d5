use std::str::FromStr;

use bitcoin::{
    consensus::encode::{deserialize, serialize},
    hashes::Hash,
    Address, Script,
};
use num::BigUint;

use super::{parser::ChainParser, Network};
use crate::{
    codec::{addr_desc_script, parse_synthetic_addr_desc, script_addr_desc, synthetic_addr_desc},
    error::{InvalidAddressSnafu, ParseBlockSnafu, ParseTxSnafu},
    model::{AddrDesc, Block, BlockHeader, Hash256, OutPoint, Tx, Vin, Vout},
    Result,
};

/// Synthetic descriptor tag for null-data (OP_RETURN) outputs.
pub const NULL_DATA_TAG: u8 = b'N';

/// Parser for Bitcoin and its forks sharing the same wire format. Address
/// descriptors are output scripts.
#[derive(Debug, Clone)]
pub struct BitcoinParser {
    network: bitcoin::Network,
}

impl BitcoinParser {
    pub fn new(network: Network) -> Self {
        Self {
            network: network.into(),
        }
    }

    fn convert_tx(tx: &bitcoin::Transaction) -> Tx {
        let vin = tx
            .input
            .iter()
            .map(|input| Vin {
                prev: (!input.previous_output.is_null()).then(|| OutPoint {
                    txid: Hash256(input.previous_output.txid.to_byte_array()),
                    vout: input.previous_output.vout,
                }),
                script_sig: input.script_sig.to_bytes(),
                sequence: input.sequence.0,
            })
            .collect();
        let vout = tx
            .output
            .iter()
            .enumerate()
            .map(|(n, out)| Vout {
                value: BigUint::from(out.value.to_sat()),
                n: n as u32,
                script: out.script_pubkey.to_bytes(),
                asset: None,
            })
            .collect();
        Tx {
            txid: Hash256(tx.txid().to_byte_array()),
            version: tx.version.0,
            lock_time: tx.lock_time.to_consensus_u32(),
            vin,
            vout,
            raw: serialize(tx),
        }
    }
}

impl ChainParser for BitcoinParser {
    fn addr_desc_from_address(&self, address: &str) -> Result<AddrDesc> {
        let address = Address::from_str(address)
            .map_err(|e| e.to_string())
            .and_then(|a| a.require_network(self.network).map_err(|e| e.to_string()))
            .map_err(|reason| {
                InvalidAddressSnafu {
                    address,
                    reason,
                }
                .build()
            })?;
        Ok(AddrDesc(address.script_pubkey().to_bytes()))
    }

    fn addresses_from_addr_desc(&self, desc: &AddrDesc) -> Result<(Vec<String>, bool)> {
        if let Some((NULL_DATA_TAG, script)) = parse_synthetic_addr_desc(desc) {
            return Ok((vec![op_return_label(script)], false));
        }
        let Some(script) = addr_desc_script(desc) else {
            return Ok((Vec::new(), false));
        };
        match Address::from_script(Script::from_bytes(script), self.network) {
            Ok(address) => Ok((vec![address.to_string()], true)),
            Err(_) => Ok((Vec::new(), false)),
        }
    }

    fn addr_desc_from_vout(&self, vout: &Vout) -> Result<AddrDesc> {
        let script = Script::from_bytes(&vout.script);
        if script.is_op_return() {
            return Ok(synthetic_addr_desc(NULL_DATA_TAG, &vout.script));
        }
        Ok(script_addr_desc(&vout.script))
    }

    fn parse_block(&self, bytes: &[u8], height: u32) -> Result<Block> {
        let block: bitcoin::Block = deserialize(bytes).map_err(|e| {
            ParseBlockSnafu {
                hash: format!("at height {height}"),
                reason: e.to_string(),
            }
            .build()
        })?;
        let header = BlockHeader {
            hash: Hash256(block.block_hash().to_byte_array()),
            prev_hash: Hash256(block.header.prev_blockhash.to_byte_array()),
            height,
            time: i64::from(block.header.time),
            size: bytes.len() as u32,
        };
        let txs = block.txdata.iter().map(Self::convert_tx).collect();
        Ok(Block { header, txs })
    }

    fn parse_tx(&self, bytes: &[u8]) -> Result<Tx> {
        let tx: bitcoin::Transaction = deserialize(bytes).map_err(|e| {
            ParseTxSnafu {
                reason: e.to_string(),
            }
            .build()
        })?;
        Ok(Self::convert_tx(&tx))
    }

    /// Node JSON for a transaction always carries the raw `hex`.
    fn parse_tx_from_json(&self, raw: &serde_json::Value) -> Result<Tx> {
        let hex = raw.get("hex").and_then(|h| h.as_str()).ok_or_else(|| {
            ParseTxSnafu {
                reason: "missing hex field",
            }
            .build()
        })?;
        self.parse_tx(&hex::decode(hex)?)
    }
}

fn op_return_label(script: &[u8]) -> String {
    // skip OP_RETURN and the push opcode
    let data = script.get(2..).unwrap_or_default();
    match std::str::from_utf8(data) {
        Ok(text) if !text.is_empty() && text.chars().all(|c| !c.is_control()) => {
            format!("OP_RETURN ({text})")
        }
        _ => format!("OP_RETURN {}", hex::encode(data)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Genesis coinbase transaction.
    const GENESIS_TX: &str = "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000";

    #[test]
    fn test_parse_genesis_coinbase() {
        let parser = BitcoinParser::new(Network::Mainnet);
        let tx = parser.parse_tx(&hex::decode(GENESIS_TX).unwrap()).unwrap();
        assert_eq!(
            tx.txid.to_string(),
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
        );
        assert!(tx.is_coinbase());
        assert_eq!(tx.vout[0].value, BigUint::from(5_000_000_000u64));
        assert_eq!(hex::encode(&tx.raw), GENESIS_TX);
    }

    #[test]
    fn test_address_descriptor_round_trip() {
        let parser = BitcoinParser::new(Network::Mainnet);
        let address = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
        let desc = parser.addr_desc_from_address(address).unwrap();
        assert_eq!(desc.as_bytes()[..3], [0x76, 0xa9, 0x14]);
        let (addresses, searchable) = parser.addresses_from_addr_desc(&desc).unwrap();
        assert_eq!(addresses, vec![address.to_string()]);
        assert!(searchable);
    }

    #[test]
    fn test_wrong_network_address_is_rejected() {
        let parser = BitcoinParser::new(Network::Mainnet);
        let err = parser
            .addr_desc_from_address("tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx")
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
    }

    #[test]
    fn test_op_return_is_synthetic_and_not_searchable() {
        let parser = BitcoinParser::new(Network::Mainnet);
        let mut script = vec![0x6a, 0x05];
        script.extend_from_slice(b"hello");
        let vout = Vout {
            value: BigUint::default(),
            n: 0,
            script,
            asset: None,
        };
        let desc = parser.addr_desc_from_vout(&vout).unwrap();
        let (addresses, searchable) = parser.addresses_from_addr_desc(&desc).unwrap();
        assert_eq!(addresses, vec!["OP_RETURN (hello)".to_string()]);
        assert!(!searchable);
    }

    #[test]
    fn test_invalid_opcode_script_is_not_null_data() {
        let parser = BitcoinParser::new(Network::Mainnet);
        let vout = Vout {
            value: BigUint::from(1u32),
            n: 0,
            script: vec![0xff, NULL_DATA_TAG, 0x05],
            asset: None,
        };
        let desc = parser.addr_desc_from_vout(&vout).unwrap();
        assert_ne!(desc.as_bytes(), &vout.script[..]);
        let (addresses, searchable) = parser.addresses_from_addr_desc(&desc).unwrap();
        assert!(addresses.is_empty());
        assert!(!searchable);
    }

    #[test]
    fn test_pack_unpack_tx_keeps_height_and_time() {
        let parser = BitcoinParser::new(Network::Mainnet);
        let tx = parser.parse_tx(&hex::decode(GENESIS_TX).unwrap()).unwrap();
        let packed = parser.pack_tx(&tx, 0, 1231006505).unwrap();
        let (unpacked, height, time) = parser.unpack_tx(&packed).unwrap();
        assert_eq!((unpacked, height, time), (tx, 0, 1231006505));
    }
}
