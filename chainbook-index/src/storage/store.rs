use std::{fs, marker::PhantomData, path::Path, sync::Arc};

use chainbook_db::{
    get_db_default_options, version::DBVersionControl, Column, ColumnName, LedgerColumn,
    Result as DBResult, Rocks, Snapshot, WriteBatch,
};
use log::{debug, info, warn};
use parking_lot::RwLock;

use super::columns::*;
use super::RepositoryOps;
use crate::{
    error::{CoinMismatchSnafu, Error},
    model::{
        AddrBalance, AddrDesc, Asset, BlockHash, BlockTx, DbState, HeightInfo, InternalState,
        OutPoint, TxAddresses, TxInput, TxLocation, Txid,
    },
    Result,
};

/// Bumped whenever the key or value grammar of any column changes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct IndexStore(Arc<Rocks>);

impl IndexStore {
    pub fn open(path: &Path, cache_size_mb: usize) -> Result<Self> {
        fs::create_dir_all(path)?;
        let opts = get_db_default_options(cache_size_mb);
        let backend = Arc::new(Rocks::open(path, &column_families(), Some(opts))?);

        Ok(Self(backend))
    }

    pub fn column<C>(&self) -> LedgerColumn<C>
    where
        C: Column + ColumnName,
    {
        LedgerColumn {
            backend: Arc::clone(&self.0),
            column: PhantomData,
        }
    }

    pub fn snapshot(&self) -> Snapshot<'_> {
        self.0.snapshot()
    }

    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        Ok(self.0.write(batch)?)
    }
}

/// The typed store. Owns every column family; the block writer is its only
/// mutator, everything else reads through the typed getters or a snapshot.
pub struct Store {
    db: IndexStore,
    coin: String,
    start_height: u32,
    state: RwLock<InternalState>,
    pub internal_state: InternalStateRow,
    pub height: Height,
    pub block_txs: BlockTxs,
    pub tx_addresses: TxAddressesRow,
    pub addresses: Addresses,
    pub address_balance: AddressBalance,
    pub txid_map: TxidMap,
    pub transactions: Transactions,
    pub assets: Assets,
    pub tx_assets: TxAssets,
    pub fiat_rates: FiatRates,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("coin", &self.coin)
            .field("state", &*self.state.read())
            .finish()
    }
}

impl DBVersionControl for Store {
    const CURRENT_VERSION: u32 = SCHEMA_VERSION;

    fn set_version(&self, version: u32) -> DBResult<()> {
        let col = self.db.column::<InternalStateRow>();
        let key = INTERNAL_STATE_KEY.to_string();
        let mut state = col
            .get(&key)?
            .unwrap_or_else(|| InternalState::new(&self.coin, version, self.start_height));
        state.schema_version = version;
        col.put(&key, &state)?;
        *self.state.write() = state;
        Ok(())
    }

    fn get_version(&self) -> DBResult<Option<u32>> {
        let col = self.db.column::<InternalStateRow>();
        Ok(col
            .get(&INTERNAL_STATE_KEY.to_string())?
            .map(|state| state.schema_version))
    }
}

impl Store {
    /// Opens the store at `path` for `coin` and validates its internal state.
    /// A store of another coin or schema version, or one marked inconsistent,
    /// is rejected before anything is written.
    pub fn open(path: &Path, coin: &str, start_height: u32, cache_size_mb: usize) -> Result<Self> {
        let db = IndexStore::open(path, cache_size_mb)?;
        let store = Self {
            coin: coin.to_string(),
            start_height,
            state: RwLock::new(InternalState::new(coin, SCHEMA_VERSION, start_height)),
            internal_state: InternalStateRow::new(&db),
            height: Height::new(&db),
            block_txs: BlockTxs::new(&db),
            tx_addresses: TxAddressesRow::new(&db),
            addresses: Addresses::new(&db),
            address_balance: AddressBalance::new(&db),
            txid_map: TxidMap::new(&db),
            transactions: Transactions::new(&db),
            assets: Assets::new(&db),
            tx_assets: TxAssets::new(&db),
            fiat_rates: FiatRates::new(&db),
            db,
        };

        let existing = store
            .internal_state
            .get(&INTERNAL_STATE_KEY.to_string())?;
        if let Some(state) = &existing {
            if state.coin != coin {
                return CoinMismatchSnafu {
                    found: &state.coin,
                    expected: coin,
                }
                .fail();
            }
        }
        store.startup()?;

        let mut state = store
            .internal_state
            .get(&INTERNAL_STATE_KEY.to_string())?
            .ok_or(Error::InconsistentState)?;
        match (existing.is_some(), state.db_state) {
            (_, DbState::Inconsistent) => return Err(Error::InconsistentState),
            (true, DbState::Open) => {
                warn!("Store was not closed cleanly, last tip {:?}", state.tip())
            }
            _ => {}
        }
        state.db_state = DbState::Open;
        store.put_state(state)?;
        info!(
            "Opened {coin} store at {}, tip {:?}",
            path.display(),
            store.best_block()
        );
        Ok(store)
    }

    fn put_state(&self, state: InternalState) -> Result<()> {
        self.internal_state
            .put(&INTERNAL_STATE_KEY.to_string(), &state)?;
        *self.state.write() = state;
        Ok(())
    }

    /// Marks the store cleanly closed and flushes it.
    pub fn close(&self) -> Result<()> {
        let mut state = self.internal_state();
        state.db_state = DbState::Closed;
        self.put_state(state)?;
        self.db.0.flush()?;
        info!("Closed {} store", self.coin);
        Ok(())
    }

    /// Marks the store as needing a rebuild. Subsequent opens fail.
    pub fn mark_inconsistent(&self) -> Result<()> {
        let mut state = self.internal_state();
        state.db_state = DbState::Inconsistent;
        self.put_state(state)?;
        self.db.0.flush()?;
        Ok(())
    }

    pub fn coin(&self) -> &str {
        &self.coin
    }

    pub fn start_height(&self) -> u32 {
        self.start_height
    }

    pub fn internal_state(&self) -> InternalState {
        self.state.read().clone()
    }

    pub fn best_block(&self) -> Option<(u32, BlockHash)> {
        self.state.read().tip()
    }

    pub fn snapshot(&self) -> Snapshot<'_> {
        self.db.snapshot()
    }

    /// Commits `batch` together with the new cursor `state`.
    pub fn commit(&self, mut batch: WriteBatch, state: InternalState) -> Result<()> {
        self.internal_state
            .batch_put(&mut batch, &INTERNAL_STATE_KEY.to_string(), &state)?;
        self.db.write(batch)?;
        debug!("committed tip {:?}", state.tip());
        *self.state.write() = state;
        Ok(())
    }

    /// Writes a batch that does not move the cursor.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db.write(batch)
    }

    pub fn block_hash(&self, height: u32) -> Result<Option<BlockHash>> {
        Ok(self.height.get(&height)?.map(|info| info.hash))
    }

    pub fn block_info(&self, height: u32) -> Result<Option<HeightInfo>> {
        self.height.get(&height)
    }

    pub fn block_txs(&self, hash: &BlockHash) -> Result<Option<Vec<BlockTx>>> {
        self.block_txs.get(hash)
    }

    pub fn block_txids(&self, hash: &BlockHash) -> Result<Option<Vec<Txid>>> {
        Ok(self
            .block_txs
            .get(hash)?
            .map(|txs| txs.into_iter().map(|tx| tx.txid).collect()))
    }

    pub fn tx_addresses(&self, txid: &Txid) -> Result<Option<TxAddresses>> {
        self.tx_addresses.get(txid)
    }

    pub fn addr_balance(&self, desc: &AddrDesc) -> Result<Option<AddrBalance>> {
        self.address_balance.get(desc)
    }

    pub fn tx_location(&self, txid: &Txid) -> Result<Option<TxLocation>> {
        self.txid_map.get(txid)
    }

    pub fn asset(&self, guid: u64) -> Result<Option<Asset>> {
        self.assets.get(&guid)
    }

    /// Confirmed output `outpoint` as an input would consume it, if it is
    /// known and unspent.
    pub fn unspent_output(&self, outpoint: &OutPoint) -> Result<Option<TxInput>> {
        let Some(ta) = self.tx_addresses.get(&outpoint.txid)? else {
            return Ok(None);
        };
        Ok(ta
            .outputs
            .get(outpoint.vout as usize)
            .filter(|output| !output.spent)
            .map(|output| TxInput {
                addr_desc: output.addr_desc.clone(),
                value: output.value.clone(),
                asset: output.asset.clone(),
            }))
    }

    /// Hash over the contents of every column family.
    pub fn hash_db_state(&self) -> Result<String> {
        Ok(self.db.0.hash_db_state(&COLUMN_NAMES)?)
    }

    pub fn dump_table_sizes(&self) -> Result<()> {
        Ok(self.db.0.dump_table_sizes(&COLUMN_NAMES)?)
    }
}
