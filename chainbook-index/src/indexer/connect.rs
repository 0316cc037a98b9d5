use std::collections::{BTreeMap, BTreeSet, HashSet};

use chainbook_db::WriteBatch;
use log::{debug, info, warn};

use super::{is_indexable, sub_value, BlockChanges, BlockIndexer};
use crate::{
    error::PrevHashMismatchSnafu,
    model::{
        AddrDesc, AddrIndexEntry, Asset, AssetInfo, Block, BlockTx, HeightInfo, IoRef, Tx,
        TxAddresses, TxInput, TxLocation, TxOutput, Txid, Utxo,
    },
    Result,
};

/// Asset rows touched while connecting one block.
#[derive(Default)]
struct AssetChanges {
    assets: BTreeMap<u64, Asset>,
    txs: BTreeMap<u64, Vec<Txid>>,
}

impl AssetChanges {
    fn touch(&mut self, indexer: &BlockIndexer, guid: u64, txid: &Txid) -> Result<()> {
        let txids = self.txs.entry(guid).or_default();
        if txids.contains(txid) {
            return Ok(());
        }
        txids.push(*txid);
        if !self.assets.contains_key(&guid) {
            match indexer.store.asset(guid)? {
                Some(asset) => {
                    self.assets.insert(guid, asset);
                }
                None => {
                    warn!("transaction {txid} references unknown asset {guid}");
                    return Ok(());
                }
            }
        }
        if let Some(asset) = self.assets.get_mut(&guid) {
            asset.tx_count += 1;
        }
        Ok(())
    }
}

impl BlockIndexer {
    /// Connects `block` on top of the current tip in one atomic batch.
    ///
    /// The block must extend the tip, or be at the configured start height
    /// of an empty store.
    pub fn index_block(&self, block: &Block) -> Result<()> {
        let height = block.height();
        let mut state = self.store.internal_state();
        match state.tip() {
            Some((tip_height, tip_hash))
                if block.header.prev_hash == tip_hash && height == tip_height + 1 => {}
            None if height == state.start_height => {}
            tip => {
                return PrevHashMismatchSnafu {
                    height,
                    hash: block.hash().to_string(),
                    tip: tip.map_or("none".to_string(), |(h, hash)| format!("{hash} at {h}")),
                }
                .fail()
            }
        }

        let asset_support = self.parser.asset_support();
        let mut changes = BlockChanges::default();
        let mut assets = AssetChanges::default();
        let mut block_txs = Vec::with_capacity(block.txs.len());
        let mut batch = WriteBatch::default();

        for (position, tx) in block.txs.iter().enumerate() {
            let tx_index = position as u32;
            let mut touched = HashSet::new();

            if let Some(definition) = asset_support
                .then(|| self.parser.asset_definition(tx))
                .flatten()
            {
                let guid = definition.guid;
                let carried = tx
                    .vout
                    .iter()
                    .any(|vout| vout.asset.as_ref().is_some_and(|a| a.guid == guid));
                if carried {
                    debug!("asset {guid} created by {}", tx.txid);
                    assets.assets.insert(
                        guid,
                        Asset {
                            definition,
                            created_height: height,
                            tx_count: 0,
                        },
                    );
                } else {
                    // disconnect finds created assets through the outputs
                    warn!("asset {guid} defined by {} has no output of it, ignored", tx.txid);
                }
            }

            let outputs = self.connect_outputs(
                tx,
                height,
                tx_index,
                &mut changes,
                &mut touched,
                asset_support.then_some(&mut assets),
            )?;
            changes.tx_addresses.insert(
                tx.txid,
                TxAddresses {
                    height,
                    inputs: Vec::new(),
                    outputs,
                },
            );

            let inputs = self.connect_inputs(
                tx,
                tx_index,
                &mut changes,
                &mut touched,
                asset_support.then_some(&mut assets),
            )?;
            if let Some(ta) = changes.tx_addresses.get_mut(&tx.txid) {
                ta.inputs = inputs;
            }

            block_txs.push(BlockTx {
                txid: tx.txid,
                inputs: tx.vin.iter().filter_map(|vin| vin.prev).collect(),
            });
            self.store.txid_map.batch_put(
                &mut batch,
                &tx.txid,
                &TxLocation {
                    height,
                    position: tx_index,
                },
            )?;
            if self.store_raw_txs {
                let packed = self.parser.pack_tx(tx, height, block.header.time)?;
                self.store.transactions.batch_put(&mut batch, &tx.txid, &packed)?;
            }
        }

        for (txid, ta) in &changes.tx_addresses {
            self.store.tx_addresses.batch_put(&mut batch, txid, ta)?;
        }
        for (desc, entries) in &changes.addresses {
            self.store
                .addresses
                .batch_put(&mut batch, &(desc.clone(), height), entries)?;
        }
        changes.write_balances(&self.store, &mut batch)?;
        for (guid, asset) in &assets.assets {
            self.store.assets.batch_put(&mut batch, guid, asset)?;
        }
        for (guid, txids) in &assets.txs {
            self.store
                .tx_assets
                .batch_put(&mut batch, &(*guid, height), txids)?;
        }

        self.store.height.batch_put(
            &mut batch,
            &height,
            &HeightInfo {
                hash: block.hash(),
                time: block.header.time,
                tx_count: block.txs.len() as u32,
                size: block.header.size,
            },
        )?;
        self.store
            .block_txs
            .batch_put(&mut batch, &block.hash(), &block_txs)?;

        state.best_height = Some(height);
        state.best_hash = Some(block.hash());
        self.store.commit(batch, state)?;

        debug!(
            "connected block {} at {height}: {} txs, {} addresses",
            block.hash(),
            block.txs.len(),
            changes.balances.len()
        );
        if height % 1000 == 0 {
            info!("connected block {height}");
        }
        Ok(())
    }

    fn connect_outputs(
        &self,
        tx: &Tx,
        height: u32,
        tx_index: u32,
        changes: &mut BlockChanges,
        touched: &mut HashSet<AddrDesc>,
        mut assets: Option<&mut AssetChanges>,
    ) -> Result<Vec<TxOutput>> {
        let mut outputs = Vec::with_capacity(tx.vout.len());
        for vout in &tx.vout {
            let addr_desc = match self.parser.addr_desc_from_vout(vout) {
                Ok(desc) => desc,
                Err(e) => {
                    debug!("{}:{} has no address descriptor: {e}", tx.txid, vout.n);
                    AddrDesc::default()
                }
            };
            let asset = vout.asset.clone().filter(|_| assets.is_some());

            if is_indexable(&addr_desc) {
                let balance = changes.balance(&self.store, &addr_desc)?;
                if touched.insert(addr_desc.clone()) {
                    balance.txs += 1;
                }
                balance.balance += &vout.value;
                balance.add_utxo(Utxo {
                    txid: tx.txid,
                    vout: vout.n,
                    height,
                    value: vout.value.clone(),
                    asset: asset.clone(),
                });
                if let Some(AssetInfo { guid, value }) = &asset {
                    let asset_balance = balance.assets.entry(*guid).or_default();
                    asset_balance.transfers += 1;
                    asset_balance.balance += value;
                }
                changes
                    .addresses
                    .entry(addr_desc.clone())
                    .or_default()
                    .push(AddrIndexEntry {
                        tx_index,
                        io: IoRef::Output(vout.n),
                    });
            }
            if let (Some(info), Some(assets)) = (&asset, assets.as_deref_mut()) {
                assets.touch(self, info.guid, &tx.txid)?;
            }

            outputs.push(TxOutput {
                addr_desc,
                value: vout.value.clone(),
                spent: false,
                asset,
            });
        }
        Ok(outputs)
    }

    fn connect_inputs(
        &self,
        tx: &Tx,
        tx_index: u32,
        changes: &mut BlockChanges,
        touched: &mut HashSet<AddrDesc>,
        mut assets: Option<&mut AssetChanges>,
    ) -> Result<Vec<TxInput>> {
        let mut inputs = Vec::with_capacity(tx.vin.len());
        for (n, vin) in tx.vin.iter().enumerate() {
            let Some(prev) = vin.prev else {
                continue;
            };

            let funding = match changes.tx_addresses(&self.store, &prev.txid)? {
                Some(ta) => ta.outputs.get_mut(prev.vout as usize),
                None => None,
            };
            let Some(output) = funding else {
                warn!(
                    "{} input {n}: funding output {}:{} not found",
                    tx.txid, prev.txid, prev.vout
                );
                inputs.push(TxInput::default());
                continue;
            };
            if output.spent {
                warn!(
                    "{} input {n}: output {}:{} is already spent",
                    tx.txid, prev.txid, prev.vout
                );
                inputs.push(TxInput::default());
                continue;
            }
            output.spent = true;
            let input = TxInput {
                addr_desc: output.addr_desc.clone(),
                value: output.value.clone(),
                asset: output.asset.clone(),
            };

            if is_indexable(&input.addr_desc) {
                let balance = changes.balance(&self.store, &input.addr_desc)?;
                if touched.insert(input.addr_desc.clone()) {
                    balance.txs += 1;
                }
                sub_value(&mut balance.balance, &input.value, "address balance")?;
                balance.sent += &input.value;
                if balance.remove_utxo(&prev.txid, prev.vout).is_none() {
                    warn!(
                        "{} input {n}: utxo {}:{} missing from its address balance",
                        tx.txid, prev.txid, prev.vout
                    );
                }
                if let Some(AssetInfo { guid, value }) = &input.asset {
                    let asset_balance = balance.assets.entry(*guid).or_default();
                    asset_balance.transfers += 1;
                    sub_value(&mut asset_balance.balance, value, "asset balance")?;
                    asset_balance.sent += value;
                }
                changes
                    .addresses
                    .entry(input.addr_desc.clone())
                    .or_default()
                    .push(AddrIndexEntry {
                        tx_index,
                        io: IoRef::Input(n as u32),
                    });
            }
            if let (Some(info), Some(assets)) = (&input.asset, assets.as_deref_mut()) {
                assets.touch(self, info.guid, &tx.txid)?;
            }

            inputs.push(input);
        }
        Ok(inputs)
    }
}

/// Guids of the assets that `ta` moves.
pub(super) fn asset_guids(ta: &TxAddresses) -> BTreeSet<u64> {
    ta.inputs
        .iter()
        .filter_map(|input| input.asset.as_ref())
        .chain(ta.outputs.iter().filter_map(|output| output.asset.as_ref()))
        .map(|asset| asset.guid)
        .collect()
}
