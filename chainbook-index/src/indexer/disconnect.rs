use std::collections::{BTreeMap, BTreeSet, HashSet};

use chainbook_db::WriteBatch;
use log::{debug, warn};

use super::{connect::asset_guids, is_indexable, sub_value, BlockChanges, BlockIndexer};
use crate::{
    error::{DisconnectNotInvertibleSnafu, InvariantSnafu},
    model::{AddrDesc, AssetInfo, BlockHash, Txid, Utxo},
    storage::RepositoryOps,
    Result,
};

impl BlockIndexer {
    /// Reverts the tip block `hash` in one atomic batch, restoring the
    /// balances, utxos and spent flags it changed. Returns the block's txids
    /// in block order.
    pub fn invalidate_block(&self, hash: &BlockHash) -> Result<Vec<Txid>> {
        let mut state = self.store.internal_state();
        let height = match state.tip() {
            Some((height, tip)) if tip == *hash => height,
            tip => {
                return InvariantSnafu {
                    msg: format!("can only disconnect the tip {tip:?}, not {hash}"),
                }
                .fail()
            }
        };
        let block_txs = self.store.block_txs(hash)?.ok_or_else(|| {
            DisconnectNotInvertibleSnafu {
                hash: hash.to_string(),
            }
            .build()
        })?;

        let mut changes = BlockChanges::default();
        let mut block_descs = BTreeSet::new();
        let mut asset_txs: BTreeMap<u64, u32> = BTreeMap::new();
        let mut removed = HashSet::new();
        let mut batch = WriteBatch::default();

        for btx in block_txs.iter().rev() {
            let ta = self.store.tx_addresses(&btx.txid)?.ok_or_else(|| {
                DisconnectNotInvertibleSnafu {
                    hash: hash.to_string(),
                }
                .build()
            })?;
            for guid in asset_guids(&ta) {
                *asset_txs.entry(guid).or_default() += 1;
            }
            let mut touched = HashSet::new();

            if ta.inputs.len() == btx.inputs.len() {
                for (input, prev) in ta.inputs.iter().zip(&btx.inputs) {
                    if !input.is_resolved() {
                        continue;
                    }
                    let funding_height = match changes.tx_addresses(&self.store, &prev.txid)? {
                        Some(funding) => {
                            if let Some(output) = funding.outputs.get_mut(prev.vout as usize) {
                                output.spent = false;
                            }
                            funding.height
                        }
                        None => {
                            warn!("funding tx {} of {} is gone", prev.txid, btx.txid);
                            continue;
                        }
                    };
                    if !is_indexable(&input.addr_desc) {
                        continue;
                    }
                    let balance = changes.balance(&self.store, &input.addr_desc)?;
                    touched.insert(input.addr_desc.clone());
                    sub_value(&mut balance.sent, &input.value, "address sent")?;
                    balance.balance += &input.value;
                    balance.add_utxo(Utxo {
                        txid: prev.txid,
                        vout: prev.vout,
                        height: funding_height,
                        value: input.value.clone(),
                        asset: input.asset.clone(),
                    });
                    if let Some(AssetInfo { guid, value }) = &input.asset {
                        if let Some(asset_balance) = balance.assets.get_mut(guid) {
                            asset_balance.transfers = asset_balance.transfers.saturating_sub(1);
                            sub_value(&mut asset_balance.sent, value, "asset sent")?;
                            asset_balance.balance += value;
                        }
                    }
                }
            } else {
                warn!(
                    "{}: {} recorded inputs for {} outpoints, inputs left untouched",
                    btx.txid,
                    ta.inputs.len(),
                    btx.inputs.len()
                );
            }

            for (n, output) in ta.outputs.iter().enumerate() {
                if !is_indexable(&output.addr_desc) {
                    continue;
                }
                let balance = changes.balance(&self.store, &output.addr_desc)?;
                touched.insert(output.addr_desc.clone());
                sub_value(&mut balance.balance, &output.value, "address balance")?;
                if balance.remove_utxo(&btx.txid, n as u32).is_none() {
                    warn!("utxo {}:{n} missing while disconnecting", btx.txid);
                }
                if let Some(AssetInfo { guid, value }) = &output.asset {
                    if let Some(asset_balance) = balance.assets.get_mut(guid) {
                        asset_balance.transfers = asset_balance.transfers.saturating_sub(1);
                        sub_value(&mut asset_balance.balance, value, "asset balance")?;
                    }
                }
            }

            for desc in &touched {
                let balance = changes.balance(&self.store, desc)?;
                balance.txs = balance.txs.saturating_sub(1);
                balance.assets.retain(|_, asset| asset.transfers > 0);
            }
            block_descs.extend(touched.into_iter());

            self.store.tx_addresses.batch_delete(&mut batch, &btx.txid)?;
            self.store.txid_map.batch_delete(&mut batch, &btx.txid)?;
            self.store.transactions.batch_delete(&mut batch, &btx.txid)?;
            removed.insert(btx.txid);
        }

        for (txid, ta) in &changes.tx_addresses {
            if !removed.contains(txid) {
                self.store.tx_addresses.batch_put(&mut batch, txid, ta)?;
            }
        }
        for desc in &block_descs {
            self.remove_address_row(&mut batch, desc, height)?;
        }
        changes.write_balances(&self.store, &mut batch)?;
        if self.parser.asset_support() {
            self.disconnect_assets(&mut batch, &asset_txs, height)?;
        }

        self.store.height.batch_delete(&mut batch, &height)?;
        self.store.block_txs.batch_delete(&mut batch, hash)?;

        if height > state.start_height {
            let prev = self.store.block_hash(height - 1)?;
            state.best_height = prev.map(|_| height - 1);
            state.best_hash = prev;
        } else {
            state.best_height = None;
            state.best_hash = None;
        }
        self.store.commit(batch, state)?;

        debug!(
            "disconnected block {hash} at {height}: {} txs",
            block_txs.len()
        );
        Ok(block_txs.into_iter().map(|btx| btx.txid).collect())
    }

    fn remove_address_row(
        &self,
        batch: &mut WriteBatch,
        desc: &AddrDesc,
        height: u32,
    ) -> Result<()> {
        self.store
            .addresses
            .batch_delete(batch, &(desc.clone(), height))
    }

    fn disconnect_assets(
        &self,
        batch: &mut WriteBatch,
        asset_txs: &BTreeMap<u64, u32>,
        height: u32,
    ) -> Result<()> {
        // a creating tx always carries the asset, so every asset created here
        // is among the block's guids
        for (guid, txs) in asset_txs {
            self.store.tx_assets.batch_delete(batch, &(*guid, height))?;
            let Some(mut asset) = self.store.asset(*guid)? else {
                continue;
            };
            if asset.created_height == height {
                self.store.assets.batch_delete(batch, guid)?;
            } else {
                asset.tx_count = asset.tx_count.saturating_sub(*txs);
                self.store.assets.batch_put(batch, guid, &asset)?;
            }
        }
        Ok(())
    }
}
