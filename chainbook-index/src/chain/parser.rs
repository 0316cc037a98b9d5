use crate::{
    codec::{put_varint, put_varuint, Reader},
    error::UnsupportedSnafu,
    model::{AddrDesc, AssetDefinition, Block, Tx, Vout},
    Result,
};

/// Chain-specific decoding injected into the indexer. Implementations are
/// immutable after construction and called from any thread.
pub trait ChainParser: Send + Sync {
    fn addr_desc_from_address(&self, address: &str) -> Result<AddrDesc>;

    /// Addresses encoded by `desc`, and whether the descriptor is searchable
    /// by address.
    fn addresses_from_addr_desc(&self, desc: &AddrDesc) -> Result<(Vec<String>, bool)>;

    fn addr_desc_from_vout(&self, vout: &Vout) -> Result<AddrDesc>;

    fn parse_block(&self, bytes: &[u8], height: u32) -> Result<Block>;

    fn parse_tx(&self, bytes: &[u8]) -> Result<Tx>;

    fn parse_tx_from_json(&self, _raw: &serde_json::Value) -> Result<Tx> {
        UnsupportedSnafu {
            op: "parse_tx_from_json",
        }
        .fail()
    }

    /// Storage form of a confirmed transaction: height and block time ahead
    /// of the raw bytes.
    fn pack_tx(&self, tx: &Tx, height: u32, block_time: i64) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(tx.raw.len() + 10);
        put_varuint(&mut buf, u64::from(height));
        put_varint(&mut buf, block_time);
        buf.extend_from_slice(&tx.raw);
        Ok(buf)
    }

    fn unpack_tx(&self, buf: &[u8]) -> Result<(Tx, u32, i64)> {
        let mut r = Reader::new(buf, "packed tx");
        let height = r.varuint32()?;
        let block_time = r.varint()?;
        let raw = r.take_rest();
        Ok((self.parse_tx(raw)?, height, block_time))
    }

    fn asset_support(&self) -> bool {
        false
    }

    /// Asset announced by `tx`, for chains with `asset_support`.
    fn asset_definition(&self, _tx: &Tx) -> Option<AssetDefinition> {
        None
    }
}
