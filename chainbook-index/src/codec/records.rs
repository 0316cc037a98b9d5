use std::collections::BTreeMap;

use num::{BigUint, ToPrimitive};

use super::{
    compress_amount, decompress_amount, put_bigint, put_bytes, put_varint, put_varuint, Reader,
};
use crate::{
    error::DecodeSnafu,
    model::{
        AddrBalance, AddrDesc, AddrIndexEntry, Asset, AssetBalance, AssetDefinition, AssetInfo,
        BlockTx, FiatTicker, Hash256, HeightInfo, IoRef, OutPoint, TxAddresses, TxInput,
        TxLocation, TxOutput, Utxo,
    },
    Result,
};

//
// Keys
//

pub fn pack_height_key(height: u32) -> Vec<u8> {
    height.to_be_bytes().to_vec()
}

fn be_u32(bytes: &[u8], what: &'static str) -> Result<u32> {
    let array: [u8; 4] = bytes.try_into().map_err(|_| {
        DecodeSnafu {
            what,
            reason: format!("expected 4 bytes, got {}", bytes.len()),
        }
        .build()
    })?;
    Ok(u32::from_be_bytes(array))
}

pub fn unpack_height_key(key: &[u8]) -> Result<u32> {
    be_u32(key, "height key")
}

/// `desc || BE(!height)`: one address's rows sort newest first.
pub fn pack_addr_key(desc: &AddrDesc, height: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(desc.0.len() + 4);
    key.extend_from_slice(desc.as_bytes());
    key.extend_from_slice(&(!height).to_be_bytes());
    key
}

pub fn unpack_addr_key(key: &[u8]) -> Result<(AddrDesc, u32)> {
    if key.len() < 4 {
        return DecodeSnafu {
            what: "address key",
            reason: format!("{} bytes is too short", key.len()),
        }
        .fail();
    }
    let (desc, height) = key.split_at(key.len() - 4);
    Ok((AddrDesc(desc.to_vec()), !be_u32(height, "address key")?))
}

/// `BE(guid) || BE(!height)`.
pub fn pack_tx_assets_key(guid: u64, height: u32) -> Vec<u8> {
    let mut key = guid.to_be_bytes().to_vec();
    key.extend_from_slice(&(!height).to_be_bytes());
    key
}

pub fn unpack_tx_assets_key(key: &[u8]) -> Result<(u64, u32)> {
    if key.len() != 12 {
        return DecodeSnafu {
            what: "tx assets key",
            reason: format!("expected 12 bytes, got {}", key.len()),
        }
        .fail();
    }
    let mut guid = [0u8; 8];
    guid.copy_from_slice(&key[..8]);
    Ok((
        u64::from_be_bytes(guid),
        !be_u32(&key[8..], "tx assets key")?,
    ))
}

pub fn pack_ticker_key(timestamp: i64) -> Vec<u8> {
    (timestamp.max(0) as u64).to_be_bytes().to_vec()
}

pub fn unpack_ticker_key(key: &[u8]) -> Result<i64> {
    let array: [u8; 8] = key.try_into().map_err(|_| {
        DecodeSnafu {
            what: "ticker key",
            reason: format!("expected 8 bytes, got {}", key.len()),
        }
        .build()
    })?;
    Ok(u64::from_be_bytes(array) as i64)
}

//
// Height
//

pub fn pack_height_info(info: &HeightInfo) -> Vec<u8> {
    let mut buf = Vec::with_capacity(Hash256::LEN + 16);
    buf.extend_from_slice(info.hash.as_bytes());
    put_varint(&mut buf, info.time);
    put_varuint(&mut buf, u64::from(info.tx_count));
    put_varuint(&mut buf, u64::from(info.size));
    buf
}

pub fn unpack_height_info(buf: &[u8]) -> Result<HeightInfo> {
    let mut r = Reader::new(buf, "height info");
    let info = HeightInfo {
        hash: r.hash()?,
        time: r.varint()?,
        tx_count: r.varuint32()?,
        size: r.varuint32()?,
    };
    r.finish()?;
    Ok(info)
}

//
// Block txs
//

pub fn pack_block_txs(txs: &[BlockTx]) -> Vec<u8> {
    let mut buf = Vec::new();
    put_varuint(&mut buf, txs.len() as u64);
    for tx in txs {
        buf.extend_from_slice(tx.txid.as_bytes());
        put_varuint(&mut buf, tx.inputs.len() as u64);
        for input in &tx.inputs {
            buf.extend_from_slice(input.txid.as_bytes());
            put_varuint(&mut buf, u64::from(input.vout));
        }
    }
    buf
}

pub fn unpack_block_txs(buf: &[u8]) -> Result<Vec<BlockTx>> {
    let mut r = Reader::new(buf, "block txs");
    let count = r.varuint()? as usize;
    let mut txs = Vec::with_capacity(count.min(buf.len()));
    for _ in 0..count {
        let txid = r.hash()?;
        let n = r.varuint()? as usize;
        let mut inputs = Vec::with_capacity(n.min(buf.len()));
        for _ in 0..n {
            inputs.push(OutPoint {
                txid: r.hash()?,
                vout: r.varuint32()?,
            });
        }
        txs.push(BlockTx { txid, inputs });
    }
    r.finish()?;
    Ok(txs)
}

//
// Asset info
//
// A list of entries that may carry asset info is prefixed by
// `varuint(len << 1 | has_assets)`. Only when the flag is set does every entry
// carry a presence byte, so chains without assets pay nothing.

fn put_list_header(buf: &mut Vec<u8>, len: usize, has_assets: bool) {
    put_varuint(buf, (len as u64) << 1 | u64::from(has_assets));
}

fn read_list_header(r: &mut Reader) -> Result<(usize, bool)> {
    let header = r.varuint()?;
    Ok(((header >> 1) as usize, header & 1 == 1))
}

fn put_asset(buf: &mut Vec<u8>, asset: &Option<AssetInfo>) -> Result<()> {
    match asset {
        None => buf.push(0),
        Some(info) => {
            buf.push(1);
            put_varuint(buf, info.guid);
            put_bigint(buf, &info.value)?;
        }
    }
    Ok(())
}

fn read_asset(r: &mut Reader, has_assets: bool) -> Result<Option<AssetInfo>> {
    if !has_assets || r.u8()? == 0 {
        return Ok(None);
    }
    Ok(Some(AssetInfo {
        guid: r.varuint()?,
        value: r.bigint()?,
    }))
}

//
// Tx addresses
//

pub fn pack_tx_addresses(ta: &TxAddresses) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64 + 40 * (ta.inputs.len() + ta.outputs.len()));
    put_varuint(&mut buf, u64::from(ta.height));

    let has_assets = ta.inputs.iter().any(|i| i.asset.is_some());
    put_list_header(&mut buf, ta.inputs.len(), has_assets);
    for input in &ta.inputs {
        put_bytes(&mut buf, input.addr_desc.as_bytes());
        put_bigint(&mut buf, &input.value)?;
        if has_assets {
            put_asset(&mut buf, &input.asset)?;
        }
    }

    let has_assets = ta.outputs.iter().any(|o| o.asset.is_some());
    put_list_header(&mut buf, ta.outputs.len(), has_assets);
    for output in &ta.outputs {
        let len = output.addr_desc.0.len() as i64;
        put_varint(&mut buf, if output.spent { !len } else { len });
        buf.extend_from_slice(output.addr_desc.as_bytes());
        put_bigint(&mut buf, &output.value)?;
        if has_assets {
            put_asset(&mut buf, &output.asset)?;
        }
    }
    Ok(buf)
}

pub fn unpack_tx_addresses(buf: &[u8]) -> Result<TxAddresses> {
    let mut r = Reader::new(buf, "tx addresses");
    let height = r.varuint32()?;

    let (n, has_assets) = read_list_header(&mut r)?;
    let mut inputs = Vec::with_capacity(n.min(buf.len()));
    for _ in 0..n {
        inputs.push(TxInput {
            addr_desc: AddrDesc(r.bytes()?.to_vec()),
            value: r.bigint()?,
            asset: read_asset(&mut r, has_assets)?,
        });
    }

    let (n, has_assets) = read_list_header(&mut r)?;
    let mut outputs = Vec::with_capacity(n.min(buf.len()));
    for _ in 0..n {
        let len = r.varint()?;
        let (spent, len) = if len < 0 { (true, !len) } else { (false, len) };
        outputs.push(TxOutput {
            addr_desc: AddrDesc(r.take(len as usize)?.to_vec()),
            value: r.bigint()?,
            spent,
            asset: read_asset(&mut r, has_assets)?,
        });
    }
    r.finish()?;
    Ok(TxAddresses {
        height,
        inputs,
        outputs,
    })
}

//
// Address balance
//

pub fn pack_addr_balance(balance: &AddrBalance) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(32 + 48 * balance.utxos.len());
    put_varuint(&mut buf, u64::from(balance.txs));
    put_bigint(&mut buf, &balance.sent)?;
    put_bigint(&mut buf, &balance.balance)?;

    let has_assets = balance.utxos.iter().any(|u| u.asset.is_some());
    put_list_header(&mut buf, balance.utxos.len(), has_assets);
    for utxo in &balance.utxos {
        buf.extend_from_slice(utxo.txid.as_bytes());
        put_varuint(&mut buf, u64::from(utxo.vout));
        put_varuint(&mut buf, u64::from(utxo.height));
        put_bigint(&mut buf, &utxo.value)?;
        if has_assets {
            put_asset(&mut buf, &utxo.asset)?;
        }
    }

    if !balance.assets.is_empty() {
        put_varuint(&mut buf, balance.assets.len() as u64);
        for (guid, asset) in &balance.assets {
            put_varuint(&mut buf, *guid);
            put_varuint(&mut buf, u64::from(asset.transfers));
            put_bigint(&mut buf, &asset.sent)?;
            put_bigint(&mut buf, &asset.balance)?;
        }
    }
    Ok(buf)
}

pub fn unpack_addr_balance(buf: &[u8]) -> Result<AddrBalance> {
    let mut r = Reader::new(buf, "address balance");
    let txs = r.varuint32()?;
    let sent = r.bigint()?;
    let balance = r.bigint()?;

    let (n, has_assets) = read_list_header(&mut r)?;
    let mut utxos = Vec::with_capacity(n.min(buf.len()));
    for _ in 0..n {
        utxos.push(Utxo {
            txid: r.hash()?,
            vout: r.varuint32()?,
            height: r.varuint32()?,
            value: r.bigint()?,
            asset: read_asset(&mut r, has_assets)?,
        });
    }

    let mut assets = BTreeMap::new();
    if !r.is_empty() {
        let n = r.varuint()?;
        for _ in 0..n {
            let guid = r.varuint()?;
            assets.insert(
                guid,
                AssetBalance {
                    transfers: r.varuint32()?,
                    sent: r.bigint()?,
                    balance: r.bigint()?,
                },
            );
        }
    }
    r.finish()?;
    Ok(AddrBalance {
        txs,
        sent,
        balance,
        utxos,
        assets,
    })
}

//
// Address index rows
//

/// Inputs are stored as `!index` so a single signed varint carries the side.
pub fn pack_addr_index_entries(entries: &[AddrIndexEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(entries.len() * 3);
    for entry in entries {
        put_varuint(&mut buf, u64::from(entry.tx_index));
        let io = match entry.io {
            IoRef::Output(n) => i64::from(n),
            IoRef::Input(n) => !i64::from(n),
        };
        put_varint(&mut buf, io);
    }
    buf
}

pub fn unpack_addr_index_entries(buf: &[u8]) -> Result<Vec<AddrIndexEntry>> {
    let mut r = Reader::new(buf, "address index");
    let mut entries = Vec::new();
    while !r.is_empty() {
        let tx_index = r.varuint32()?;
        let io = r.varint()?;
        let (input, index) = if io < 0 { (true, !io) } else { (false, io) };
        let index = u32::try_from(index).map_err(|_| {
            DecodeSnafu {
                what: "address index",
                reason: format!("io index {index} overflows 32 bits"),
            }
            .build()
        })?;
        let io = if input {
            IoRef::Input(index)
        } else {
            IoRef::Output(index)
        };
        entries.push(AddrIndexEntry { tx_index, io });
    }
    Ok(entries)
}

//
// Txid map
//

pub fn pack_tx_location(location: &TxLocation) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    put_varuint(&mut buf, u64::from(location.height));
    put_varuint(&mut buf, u64::from(location.position));
    buf
}

pub fn unpack_tx_location(buf: &[u8]) -> Result<TxLocation> {
    let mut r = Reader::new(buf, "tx location");
    let location = TxLocation {
        height: r.varuint32()?,
        position: r.varuint32()?,
    };
    r.finish()?;
    Ok(location)
}

//
// Assets
//

pub fn pack_asset(asset: &Asset) -> Result<Vec<u8>> {
    let def = &asset.definition;
    let mut buf = Vec::new();
    put_varuint(&mut buf, def.guid);
    put_bytes(&mut buf, def.symbol.as_bytes());
    buf.push(def.precision);
    put_bigint(&mut buf, &BigUint::from(compress_amount(def.max_supply)))?;
    put_bytes(&mut buf, def.metadata.as_bytes());
    put_varuint(&mut buf, u64::from(asset.created_height));
    put_varuint(&mut buf, u64::from(asset.tx_count));
    Ok(buf)
}

pub fn unpack_asset(buf: &[u8]) -> Result<Asset> {
    let mut r = Reader::new(buf, "asset");
    let guid = r.varuint()?;
    let symbol = r.string()?;
    let precision = r.u8()?;
    let compressed = r.bigint()?.to_u128().ok_or_else(|| {
        DecodeSnafu {
            what: "asset",
            reason: "max supply overflows",
        }
        .build()
    })?;
    let definition = AssetDefinition {
        guid,
        symbol,
        precision,
        max_supply: decompress_amount(compressed)?,
        metadata: r.string()?,
    };
    let asset = Asset {
        definition,
        created_height: r.varuint32()?,
        tx_count: r.varuint32()?,
    };
    r.finish()?;
    Ok(asset)
}

pub fn pack_txids(txids: &[Hash256]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + txids.len() * Hash256::LEN);
    put_varuint(&mut buf, txids.len() as u64);
    for txid in txids {
        buf.extend_from_slice(txid.as_bytes());
    }
    buf
}

pub fn unpack_txids(buf: &[u8]) -> Result<Vec<Hash256>> {
    let mut r = Reader::new(buf, "txid list");
    let n = r.varuint()? as usize;
    let mut txids = Vec::with_capacity(n.min(buf.len()));
    for _ in 0..n {
        txids.push(r.hash()?);
    }
    r.finish()?;
    Ok(txids)
}

//
// Fiat tickers
//

fn put_rates(buf: &mut Vec<u8>, rates: &BTreeMap<String, f32>) {
    put_varuint(buf, rates.len() as u64);
    for (code, rate) in rates {
        put_bytes(buf, code.as_bytes());
        buf.extend_from_slice(&rate.to_be_bytes());
    }
}

fn read_rates(r: &mut Reader) -> Result<BTreeMap<String, f32>> {
    let n = r.varuint()?;
    let mut rates = BTreeMap::new();
    for _ in 0..n {
        let code = r.string()?;
        rates.insert(code, r.f32_be()?);
    }
    Ok(rates)
}

/// Value of a ticker row; the timestamp lives in the key.
pub fn pack_ticker(ticker: &FiatTicker) -> Vec<u8> {
    let mut buf = Vec::new();
    put_rates(&mut buf, &ticker.rates);
    put_rates(&mut buf, &ticker.token_rates);
    buf
}

pub fn unpack_ticker(timestamp: i64, buf: &[u8]) -> Result<FiatTicker> {
    let mut r = Reader::new(buf, "fiat ticker");
    let rates = read_rates(&mut r)?;
    let token_rates = if r.is_empty() {
        BTreeMap::new()
    } else {
        read_rates(&mut r)?
    };
    r.finish()?;
    Ok(FiatTicker {
        timestamp,
        rates,
        token_rates,
    })
}
