//! The block writer: connects blocks to the tip and disconnects the tip, each
//! in one atomic batch. It is the only mutator of the block columns.

mod connect;
mod disconnect;
mod indexer_test;

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use chainbook_db::WriteBatch;
use num::BigUint;

use crate::{
    chain::ChainParser,
    codec::MAX_ADDR_DESC_LEN,
    error::InvariantSnafu,
    model::{AddrBalance, AddrDesc, AddrIndexEntry, TxAddresses, Txid},
    storage::Store,
    Result,
};

/// Descriptors that get balance and history rows.
pub(crate) fn is_indexable(desc: &AddrDesc) -> bool {
    !desc.is_empty() && desc.0.len() <= MAX_ADDR_DESC_LEN
}

pub(crate) fn sub_value(target: &mut BigUint, value: &BigUint, what: &str) -> Result<()> {
    if *target < *value {
        return InvariantSnafu {
            msg: format!("{what} would go negative: {target} - {value}"),
        }
        .fail();
    }
    *target -= value;
    Ok(())
}

pub struct BlockIndexer {
    store: Arc<Store>,
    parser: Arc<dyn ChainParser>,
    store_raw_txs: bool,
}

impl BlockIndexer {
    pub fn new(store: Arc<Store>, parser: Arc<dyn ChainParser>, store_raw_txs: bool) -> Self {
        Self {
            store,
            parser,
            store_raw_txs,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

/// Rows touched while one block is applied or reverted, loaded lazily from
/// the store and written back in a single batch.
#[derive(Default)]
struct BlockChanges {
    balances: HashMap<AddrDesc, AddrBalance>,
    tx_addresses: HashMap<Txid, TxAddresses>,
    addresses: BTreeMap<AddrDesc, Vec<AddrIndexEntry>>,
}

impl BlockChanges {
    fn balance<'a>(&'a mut self, store: &Store, desc: &AddrDesc) -> Result<&'a mut AddrBalance> {
        if !self.balances.contains_key(desc) {
            let balance = store.addr_balance(desc)?.unwrap_or_default();
            self.balances.insert(desc.clone(), balance);
        }
        self.balances.get_mut(desc).ok_or_else(|| {
            InvariantSnafu {
                msg: "balance vanished from the block changes",
            }
            .build()
        })
    }

    fn tx_addresses<'a>(
        &'a mut self,
        store: &Store,
        txid: &Txid,
    ) -> Result<Option<&'a mut TxAddresses>> {
        if !self.tx_addresses.contains_key(txid) {
            match store.tx_addresses(txid)? {
                Some(ta) => {
                    self.tx_addresses.insert(*txid, ta);
                }
                None => return Ok(None),
            }
        }
        Ok(self.tx_addresses.get_mut(txid))
    }

    fn write_balances(&self, store: &Store, batch: &mut WriteBatch) -> Result<()> {
        for (desc, balance) in &self.balances {
            if balance.txs == 0 {
                store.address_balance.batch_delete(batch, desc)?;
            } else {
                store.address_balance.batch_put(batch, desc, balance)?;
            }
        }
        Ok(())
    }
}
