//! In-memory mirror of the backend's unconfirmed transactions with
//! address→txid and outpoint→spender indexes.
//!
//! Readers take an `Arc` of the current snapshot; refreshes and block
//! evictions build a new snapshot and swap it in under one write lock.

mod mempool_test;

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{stream, StreamExt};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};

use crate::{
    chain::{ChainBackend, ChainParser, Notification},
    config::CoinConfig,
    indexer::is_indexable,
    model::{AddrDesc, HistoryItem, OutPoint, Tx, TxDirection, TxInput, TxOutput, Txid},
    storage::Store,
    Result,
};

/// Consecutive failed refreshes after which the mempool reports unhealthy.
pub const UNHEALTHY_AFTER: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct MempoolEntry {
    pub tx: Tx,
    /// UTC seconds when this process first saw the tx.
    pub first_seen: i64,
    /// One per vin; unresolved inputs are empty.
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl MempoolEntry {
    fn direction(&self, desc: &AddrDesc) -> Option<TxDirection> {
        let input = self.inputs.iter().any(|i| i.addr_desc == *desc);
        let output = self.outputs.iter().any(|o| o.addr_desc == *desc);
        match (input, output) {
            (true, true) => Some(TxDirection::Both),
            (true, false) => Some(TxDirection::Input),
            (false, true) => Some(TxDirection::Output),
            (false, false) => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct MempoolSnapshot {
    txs: HashMap<Txid, Arc<MempoolEntry>>,
    addresses: HashMap<AddrDesc, BTreeSet<Txid>>,
    spenders: HashMap<OutPoint, Txid>,
}

impl MempoolSnapshot {
    fn from_entries(txs: HashMap<Txid, Arc<MempoolEntry>>) -> Self {
        let mut addresses: HashMap<AddrDesc, BTreeSet<Txid>> = HashMap::new();
        let mut spenders = HashMap::new();
        for (txid, entry) in &txs {
            for prev in entry.tx.vin.iter().filter_map(|vin| vin.prev) {
                spenders.insert(prev, *txid);
            }
            let descs = entry
                .inputs
                .iter()
                .map(|i| &i.addr_desc)
                .chain(entry.outputs.iter().map(|o| &o.addr_desc))
                .filter(|desc| is_indexable(desc));
            for desc in descs {
                addresses.entry(desc.clone()).or_default().insert(*txid);
            }
        }
        Self {
            txs,
            addresses,
            spenders,
        }
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn get(&self, txid: &Txid) -> Option<&Arc<MempoolEntry>> {
        self.txs.get(txid)
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.txs.contains_key(txid)
    }

    /// Unconfirmed tx spending `outpoint`, if any.
    pub fn spender(&self, outpoint: &OutPoint) -> Option<Txid> {
        self.spenders.get(outpoint).copied()
    }

    /// Entries touching `desc`, newest first.
    pub fn address_entries(&self, desc: &AddrDesc) -> Vec<Arc<MempoolEntry>> {
        let mut entries: Vec<_> = self
            .addresses
            .get(desc)
            .into_iter()
            .flatten()
            .filter_map(|txid| self.txs.get(txid).cloned())
            .collect();
        entries.sort_by(|a, b| {
            b.first_seen
                .cmp(&a.first_seen)
                .then_with(|| a.tx.txid.cmp(&b.tx.txid))
        });
        entries
    }

    pub fn address_history(&self, desc: &AddrDesc) -> Vec<HistoryItem> {
        self.address_entries(desc)
            .iter()
            .filter_map(|entry| {
                entry.direction(desc).map(|direction| HistoryItem {
                    txid: entry.tx.txid,
                    height: None,
                    direction,
                })
            })
            .collect()
    }

    /// Unconfirmed outputs paying `desc` that no other mempool tx spends.
    pub fn address_outputs(&self, desc: &AddrDesc) -> Vec<(OutPoint, TxOutput)> {
        let mut outputs = Vec::new();
        for entry in self.address_entries(desc) {
            for (vout, output) in entry.outputs.iter().enumerate() {
                let outpoint = OutPoint {
                    txid: entry.tx.txid,
                    vout: vout as u32,
                };
                if output.addr_desc == *desc && !self.spenders.contains_key(&outpoint) {
                    outputs.push((outpoint, output.clone()));
                }
            }
        }
        outputs
    }

    /// Every (txid, first seen), newest first.
    pub fn all_entries(&self) -> Vec<(Txid, i64)> {
        let mut entries: Vec<_> = self
            .txs
            .iter()
            .map(|(txid, entry)| (*txid, entry.first_seen))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}

/// Fetched tx that could not be fully resolved yet.
struct Deferred {
    tx: Tx,
    first_seen: i64,
    attempts: u32,
}

pub struct Mempool {
    store: Arc<Store>,
    backend: Arc<dyn ChainBackend>,
    parser: Arc<dyn ChainParser>,
    workers: usize,
    max_deferred_attempts: u32,
    snapshot: RwLock<Arc<MempoolSnapshot>>,
    /// Serialises snapshot swaps between refreshes and block evictions.
    swap: Mutex<()>,
    deferred: Mutex<HashMap<Txid, Deferred>>,
    candidates: Mutex<HashSet<Txid>>,
    failures: AtomicU32,
}

impl Mempool {
    pub fn new(
        store: Arc<Store>,
        backend: Arc<dyn ChainBackend>,
        parser: Arc<dyn ChainParser>,
        config: &CoinConfig,
    ) -> Self {
        Self {
            store,
            backend,
            parser,
            workers: config.mempool_workers.max(1),
            max_deferred_attempts: config.mempool_max_deferred_attempts,
            snapshot: RwLock::new(Arc::new(MempoolSnapshot::default())),
            swap: Mutex::new(()),
            deferred: Mutex::new(HashMap::new()),
            candidates: Mutex::new(HashSet::new()),
            failures: AtomicU32::new(0),
        }
    }

    pub fn snapshot(&self) -> Arc<MempoolSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn size(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_healthy(&self) -> bool {
        self.failures.load(Ordering::Relaxed) < UNHEALTHY_AFTER
    }

    /// Brings the index in line with the backend's mempool. On failure the
    /// previous snapshot stays in place. Returns the new size.
    pub async fn resync(&self) -> Result<usize> {
        match self.try_resync().await {
            Ok(size) => {
                self.failures.store(0, Ordering::Relaxed);
                Ok(size)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn try_resync(&self) -> Result<usize> {
        let ids = self.backend.mempool_txids().await?;
        let wanted: HashSet<Txid> = ids.iter().copied().collect();

        // disconnected txs are parsed again if the backend still has them
        let candidates: HashSet<Txid> = std::mem::take(&mut *self.candidates.lock())
            .into_iter()
            .filter(|txid| wanted.contains(txid))
            .collect();
        let known = self.snapshot();
        let to_fetch: Vec<Txid> = {
            let deferred = self.deferred.lock();
            ids.into_iter()
                .filter(|txid| {
                    candidates.contains(txid)
                        || (!known.contains(txid) && !deferred.contains_key(txid))
                })
                .collect()
        };
        let fetched = self.fetch(to_fetch).await;

        let now = chrono::Utc::now().timestamp();
        let _swap = self.swap.lock();
        let current = self.snapshot();
        let mut pending = std::mem::take(&mut *self.deferred.lock());
        pending.retain(|txid, _| wanted.contains(txid));
        let mut readded = 0;
        for tx in fetched {
            if self.store.tx_location(&tx.txid)?.is_some() {
                continue;
            }
            if candidates.contains(&tx.txid) {
                readded += 1;
            }
            pending.insert(
                tx.txid,
                Deferred {
                    tx,
                    first_seen: now,
                    attempts: 0,
                },
            );
        }

        if readded > 0 {
            info!("{readded} disconnected txs are back in the mempool");
        }

        let mut txs: HashMap<Txid, Arc<MempoolEntry>> = current
            .txs
            .iter()
            .filter(|(txid, _)| wanted.contains(txid) && !pending.contains_key(txid))
            .map(|(txid, entry)| (*txid, Arc::clone(entry)))
            .collect();
        let removed = current.txs.keys().filter(|txid| !wanted.contains(txid)).count();

        // parents may arrive in the same tick as their children
        loop {
            let mut progress = false;
            let ids: Vec<Txid> = pending.keys().copied().collect();
            for txid in ids {
                let Some(item) = pending.get(&txid) else {
                    continue;
                };
                if let Some(inputs) = self.resolve_inputs(&item.tx, &txs)? {
                    if let Some(item) = pending.remove(&txid) {
                        let entry = self.entry(item.tx, item.first_seen, inputs);
                        txs.insert(txid, Arc::new(entry));
                        progress = true;
                    }
                }
            }
            if !progress {
                break;
            }
        }

        let mut deferred = HashMap::new();
        for (txid, mut item) in pending {
            item.attempts += 1;
            if item.attempts >= self.max_deferred_attempts {
                debug!("{txid}: inputs still unresolved, indexing without them");
                let inputs = self.partial_inputs(&item.tx, &txs)?;
                txs.insert(txid, Arc::new(self.entry(item.tx, item.first_seen, inputs)));
            } else {
                deferred.insert(txid, item);
            }
        }

        let snapshot = MempoolSnapshot::from_entries(txs);
        let size = snapshot.len();
        debug!(
            "mempool: {size} txs, {removed} dropped, {} deferred",
            deferred.len()
        );
        *self.deferred.lock() = deferred;
        *self.snapshot.write() = Arc::new(snapshot);
        Ok(size)
    }

    async fn fetch(&self, txids: Vec<Txid>) -> Vec<Tx> {
        let backend = &self.backend;
        let results: Vec<(Txid, Result<Tx>)> = stream::iter(txids)
            .map(|txid| async move { (txid, backend.tx(&txid).await) })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut txs = Vec::with_capacity(results.len());
        for (txid, result) in results {
            match result {
                Ok(tx) => txs.push(tx),
                // left the mempool between the listing and the fetch
                Err(e) if e.is_not_found() => debug!("mempool tx {txid} is gone"),
                Err(e) => warn!("unable to fetch mempool tx {txid}: {e}"),
            }
        }
        txs
    }

    fn resolve_input(
        &self,
        prev: &OutPoint,
        txs: &HashMap<Txid, Arc<MempoolEntry>>,
    ) -> Result<Option<TxInput>> {
        if let Some(input) = self.store.unspent_output(prev)? {
            return Ok(Some(input));
        }
        Ok(txs.get(&prev.txid).and_then(|parent| {
            parent.outputs.get(prev.vout as usize).map(|output| TxInput {
                addr_desc: output.addr_desc.clone(),
                value: output.value.clone(),
                asset: output.asset.clone(),
            })
        }))
    }

    /// All inputs of `tx`, or `None` while any of them is unknown.
    fn resolve_inputs(
        &self,
        tx: &Tx,
        txs: &HashMap<Txid, Arc<MempoolEntry>>,
    ) -> Result<Option<Vec<TxInput>>> {
        let mut inputs = Vec::with_capacity(tx.vin.len());
        for vin in &tx.vin {
            match vin.prev {
                None => inputs.push(TxInput::default()),
                Some(prev) => match self.resolve_input(&prev, txs)? {
                    Some(input) => inputs.push(input),
                    None => return Ok(None),
                },
            }
        }
        Ok(Some(inputs))
    }

    fn partial_inputs(
        &self,
        tx: &Tx,
        txs: &HashMap<Txid, Arc<MempoolEntry>>,
    ) -> Result<Vec<TxInput>> {
        let mut inputs = Vec::with_capacity(tx.vin.len());
        for vin in &tx.vin {
            let input = match vin.prev {
                Some(prev) => self.resolve_input(&prev, txs)?.unwrap_or_default(),
                None => TxInput::default(),
            };
            inputs.push(input);
        }
        Ok(inputs)
    }

    fn entry(&self, tx: Tx, first_seen: i64, inputs: Vec<TxInput>) -> MempoolEntry {
        let asset_support = self.parser.asset_support();
        let outputs = tx
            .vout
            .iter()
            .map(|vout| TxOutput {
                addr_desc: self.parser.addr_desc_from_vout(vout).unwrap_or_default(),
                value: vout.value.clone(),
                spent: false,
                asset: vout.asset.clone().filter(|_| asset_support),
            })
            .collect();
        MempoolEntry {
            tx,
            first_seen,
            inputs,
            outputs,
        }
    }

    /// Drops the txs of a newly connected block.
    pub fn remove_block_txs(&self, txids: &[Txid]) {
        let _swap = self.swap.lock();
        let current = self.snapshot();
        let mut deferred = self.deferred.lock();
        let mut dropped = 0;
        for txid in txids {
            if deferred.remove(txid).is_some() {
                dropped += 1;
            }
        }
        if !txids.iter().any(|txid| current.contains(txid)) {
            return;
        }
        let confirmed: HashSet<&Txid> = txids.iter().collect();
        let txs: HashMap<Txid, Arc<MempoolEntry>> = current
            .txs
            .iter()
            .filter(|(txid, _)| !confirmed.contains(txid))
            .map(|(txid, entry)| (*txid, Arc::clone(entry)))
            .collect();
        dropped += current.len() - txs.len();
        debug!("mempool: {dropped} txs confirmed");
        *self.snapshot.write() = Arc::new(MempoolSnapshot::from_entries(txs));
    }

    /// Remembers the txs of a disconnected block. The next refresh fetches
    /// and parses again those the backend still reports and forgets the rest.
    pub fn add_candidates(&self, txids: &[Txid]) {
        self.candidates.lock().extend(txids.iter().copied());
    }

    /// Refreshes on every tx notification and at least every `interval`
    /// until shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut notifications: broadcast::Receiver<Notification>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut listening = true;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
                notification = notifications.recv(), if listening => match notification {
                    Ok(Notification::NewTx(_)) => {}
                    Ok(Notification::NewBlock(_)) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("mempool skipped {n} notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("notification channel closed, polling only");
                        listening = false;
                        continue;
                    }
                },
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.resync().await {
                let failures = self.failures.load(Ordering::Relaxed);
                warn!("mempool refresh failed ({failures} in a row): {e}");
            }
        }
        debug!("mempool refresher stopped");
    }
}
