use chainbook_db::{
    Column, ColumnName, DBError, LedgerColumn, Options, Result as DBResult, Snapshot, TypedColumn,
    WriteBatch,
};

use super::{IndexStore, RepositoryOps, SortOrder};
use crate::{
    codec::*,
    define_table,
    model::{
        AddrBalance, AddrDesc, AddrIndexEntry, Asset, BlockHash, BlockTx, FiatTicker, Hash256,
        HeightInfo, InternalState, TxAddresses, TxLocation, Txid,
    },
    Result,
};

/// Key of the single internal state row in the default column family.
pub const INTERNAL_STATE_KEY: &str = "internalState";

fn hash_key(raw_key: &[u8]) -> DBResult<Hash256> {
    Hash256::from_slice(raw_key).map_err(|_| DBError::WrongKeyLength)
}

define_table! {
    pub struct InternalStateRow {
        name = "default",
        key_type = String,
        value_type = InternalState,
        custom_key = {
            fn key(index: &Self::Index) -> DBResult<Vec<u8>> {
                Ok(index.as_bytes().to_vec())
            }

            fn get_key(raw_key: Box<[u8]>) -> DBResult<Self::Index> {
                String::from_utf8(raw_key.into_vec()).map_err(|_| DBError::ParseKey)
            }
        },
        custom_value = {
            fn encode(value: &Self::Type) -> DBResult<Vec<u8>> {
                serde_json::to_vec(value).map_err(|e| DBError::ParseValue(e.to_string()))
            }

            fn decode(raw: &[u8]) -> DBResult<Self::Type> {
                serde_json::from_slice(raw).map_err(|e| DBError::ParseValue(e.to_string()))
            }
        },
    }
}

define_table! {
    pub struct Height {
        name = "height",
        key_type = u32,
        value_type = HeightInfo,
        custom_key = {
            fn key(index: &Self::Index) -> DBResult<Vec<u8>> {
                Ok(pack_height_key(*index))
            }

            fn get_key(raw_key: Box<[u8]>) -> DBResult<Self::Index> {
                Ok(unpack_height_key(&raw_key)?)
            }
        },
        custom_value = {
            fn encode(value: &Self::Type) -> DBResult<Vec<u8>> {
                Ok(pack_height_info(value))
            }

            fn decode(raw: &[u8]) -> DBResult<Self::Type> {
                Ok(unpack_height_info(raw)?)
            }
        },
    }
}

define_table! {
    pub struct BlockTxs {
        name = "blockTxs",
        key_type = BlockHash,
        value_type = Vec<BlockTx>,
        custom_key = {
            fn key(index: &Self::Index) -> DBResult<Vec<u8>> {
                Ok(index.as_bytes().to_vec())
            }

            fn get_key(raw_key: Box<[u8]>) -> DBResult<Self::Index> {
                hash_key(&raw_key)
            }
        },
        custom_value = {
            fn encode(value: &Self::Type) -> DBResult<Vec<u8>> {
                Ok(pack_block_txs(value))
            }

            fn decode(raw: &[u8]) -> DBResult<Self::Type> {
                Ok(unpack_block_txs(raw)?)
            }
        },
    }
}

define_table! {
    pub struct TxAddressesRow {
        name = "txAddresses",
        key_type = Txid,
        value_type = TxAddresses,
        custom_key = {
            fn key(index: &Self::Index) -> DBResult<Vec<u8>> {
                Ok(index.as_bytes().to_vec())
            }

            fn get_key(raw_key: Box<[u8]>) -> DBResult<Self::Index> {
                hash_key(&raw_key)
            }
        },
        custom_value = {
            fn encode(value: &Self::Type) -> DBResult<Vec<u8>> {
                Ok(pack_tx_addresses(value)?)
            }

            fn decode(raw: &[u8]) -> DBResult<Self::Type> {
                Ok(unpack_tx_addresses(raw)?)
            }
        },
    }
}

define_table! {
    /// Per-address, per-height list of the address's inputs and outputs.
    pub struct Addresses {
        name = "addresses",
        key_type = (AddrDesc, u32),
        value_type = Vec<AddrIndexEntry>,
        custom_key = {
            fn key(index: &Self::Index) -> DBResult<Vec<u8>> {
                Ok(pack_addr_key(&index.0, index.1))
            }

            fn get_key(raw_key: Box<[u8]>) -> DBResult<Self::Index> {
                Ok(unpack_addr_key(&raw_key)?)
            }
        },
        custom_value = {
            fn encode(value: &Self::Type) -> DBResult<Vec<u8>> {
                Ok(pack_addr_index_entries(value))
            }

            fn decode(raw: &[u8]) -> DBResult<Self::Type> {
                Ok(unpack_addr_index_entries(raw)?)
            }
        },
    }
}

define_table! {
    pub struct AddressBalance {
        name = "addressBalance",
        key_type = AddrDesc,
        value_type = AddrBalance,
        custom_key = {
            fn key(index: &Self::Index) -> DBResult<Vec<u8>> {
                Ok(index.0.clone())
            }

            fn get_key(raw_key: Box<[u8]>) -> DBResult<Self::Index> {
                Ok(AddrDesc(raw_key.into_vec()))
            }
        },
        custom_value = {
            fn encode(value: &Self::Type) -> DBResult<Vec<u8>> {
                Ok(pack_addr_balance(value)?)
            }

            fn decode(raw: &[u8]) -> DBResult<Self::Type> {
                Ok(unpack_addr_balance(raw)?)
            }
        },
    }
}

define_table! {
    pub struct TxidMap {
        name = "txidMap",
        key_type = Txid,
        value_type = TxLocation,
        custom_key = {
            fn key(index: &Self::Index) -> DBResult<Vec<u8>> {
                Ok(index.as_bytes().to_vec())
            }

            fn get_key(raw_key: Box<[u8]>) -> DBResult<Self::Index> {
                hash_key(&raw_key)
            }
        },
        custom_value = {
            fn encode(value: &Self::Type) -> DBResult<Vec<u8>> {
                Ok(pack_tx_location(value))
            }

            fn decode(raw: &[u8]) -> DBResult<Self::Type> {
                Ok(unpack_tx_location(raw)?)
            }
        },
    }
}

define_table! {
    /// Packed confirmed transactions, written only with `store_raw_txs`.
    pub struct Transactions {
        name = "transactions",
        key_type = Txid,
        value_type = Vec<u8>,
        custom_key = {
            fn key(index: &Self::Index) -> DBResult<Vec<u8>> {
                Ok(index.as_bytes().to_vec())
            }

            fn get_key(raw_key: Box<[u8]>) -> DBResult<Self::Index> {
                hash_key(&raw_key)
            }
        },
        custom_value = {
            fn encode(value: &Self::Type) -> DBResult<Vec<u8>> {
                Ok(value.clone())
            }

            fn decode(raw: &[u8]) -> DBResult<Self::Type> {
                Ok(raw.to_vec())
            }
        },
    }
}

define_table! {
    pub struct Assets {
        name = "assets",
        key_type = u64,
        value_type = Asset,
        custom_key = {
            fn key(index: &Self::Index) -> DBResult<Vec<u8>> {
                Ok(index.to_be_bytes().to_vec())
            }

            fn get_key(raw_key: Box<[u8]>) -> DBResult<Self::Index> {
                let bytes: [u8; 8] = raw_key
                    .as_ref()
                    .try_into()
                    .map_err(|_| DBError::WrongKeyLength)?;
                Ok(u64::from_be_bytes(bytes))
            }
        },
        custom_value = {
            fn encode(value: &Self::Type) -> DBResult<Vec<u8>> {
                Ok(pack_asset(value)?)
            }

            fn decode(raw: &[u8]) -> DBResult<Self::Type> {
                Ok(unpack_asset(raw)?)
            }
        },
    }
}

define_table! {
    /// Txids touching an asset, per (guid, height).
    pub struct TxAssets {
        name = "txAssets",
        key_type = (u64, u32),
        value_type = Vec<Txid>,
        custom_key = {
            fn key(index: &Self::Index) -> DBResult<Vec<u8>> {
                Ok(pack_tx_assets_key(index.0, index.1))
            }

            fn get_key(raw_key: Box<[u8]>) -> DBResult<Self::Index> {
                Ok(unpack_tx_assets_key(&raw_key)?)
            }
        },
        custom_value = {
            fn encode(value: &Self::Type) -> DBResult<Vec<u8>> {
                Ok(pack_txids(value))
            }

            fn decode(raw: &[u8]) -> DBResult<Self::Type> {
                Ok(unpack_txids(raw)?)
            }
        },
    }
}

//
// Fiat rates. The timestamp lives only in the key, so rows are stamped with
// it when read back.
//
#[derive(Debug)]
pub struct FiatRatesColumn;

impl ColumnName for FiatRatesColumn {
    const NAME: &'static str = "fiatRates";
}

impl Column for FiatRatesColumn {
    type Index = i64;

    fn key(index: &Self::Index) -> DBResult<Vec<u8>> {
        Ok(pack_ticker_key(*index))
    }

    fn get_key(raw_key: Box<[u8]>) -> DBResult<Self::Index> {
        Ok(unpack_ticker_key(&raw_key)?)
    }
}

impl TypedColumn for FiatRatesColumn {
    type Type = FiatTicker;

    fn encode(value: &Self::Type) -> DBResult<Vec<u8>> {
        Ok(pack_ticker(value))
    }

    fn decode(raw: &[u8]) -> DBResult<Self::Type> {
        Ok(unpack_ticker(0, raw)?)
    }
}

#[derive(Debug)]
pub struct FiatRates {
    col: LedgerColumn<FiatRatesColumn>,
}

impl FiatRates {
    pub fn new(store: &IndexStore) -> Self {
        Self {
            col: store.column(),
        }
    }

    pub fn batch_put(&self, batch: &mut WriteBatch, ticker: &FiatTicker) -> Result<()> {
        Ok(self.col.batch_put(batch, &ticker.timestamp, ticker)?)
    }

    pub fn get_at(&self, snapshot: &Snapshot<'_>, timestamp: i64) -> Result<Option<FiatTicker>> {
        Ok(self.col.get_at(snapshot, &timestamp)?.map(|mut ticker| {
            ticker.timestamp = timestamp;
            ticker
        }))
    }

    /// Tickers from `from` (inclusive) in `order`, read from `snapshot`.
    pub fn list_at<'a>(
        &'a self,
        snapshot: &'a Snapshot<'a>,
        from: Option<i64>,
        order: SortOrder,
    ) -> Result<impl Iterator<Item = Result<FiatTicker>> + 'a> {
        Ok(self
            .col
            .iter_at(snapshot, from, order.into())?
            .map(|item| {
                let (timestamp, mut ticker) = item?;
                ticker.timestamp = timestamp;
                Ok(ticker)
            }))
    }
}

/// Every column family with its options. Address rows are read by prefix
/// scans only.
pub fn column_families() -> Vec<(&'static str, Option<Options>)> {
    vec![
        (InternalStateRow::NAME, None),
        (Height::NAME, None),
        (BlockTxs::NAME, None),
        (TxAddressesRow::NAME, None),
        (Addresses::NAME, Some(chainbook_db::get_cf_scan_options())),
        (AddressBalance::NAME, None),
        (TxidMap::NAME, None),
        (Transactions::NAME, None),
        (Assets::NAME, None),
        (TxAssets::NAME, None),
        (FiatRatesColumn::NAME, None),
    ]
}

pub const COLUMN_NAMES: [&str; 11] = [
    InternalStateRow::NAME,
    Height::NAME,
    BlockTxs::NAME,
    TxAddressesRow::NAME,
    Addresses::NAME,
    AddressBalance::NAME,
    TxidMap::NAME,
    Transactions::NAME,
    Assets::NAME,
    TxAssets::NAME,
    FiatRatesColumn::NAME,
];
