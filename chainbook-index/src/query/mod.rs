//! Read-only façade the API layer calls into. Merges the confirmed index
//! with the mempool; a tx present in both is reported as confirmed.


use std::{collections::HashSet, num::NonZeroUsize, sync::Arc};

use log::debug;
use lru::LruCache;
use num::{BigInt, BigUint};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    chain::{ChainBackend, ChainParser},
    config::CoinConfig,
    error::{NotFoundKind, NotFoundSnafu},
    mempool::Mempool,
    model::{
        AssetInfo, BlockHash, FiatTicker, HistoryPage, OutPoint, SyncStatus, Tx, TxDetail,
        TxLocation, Txid,
    },
    storage::{HistoryQuery, RepositoryOps, Store},
    sync::SharedStatus,
    Result,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressSummary {
    pub address: String,
    pub balance: BigUint,
    pub total_received: BigUint,
    pub total_sent: BigUint,
    pub txs: u32,
    /// Net effect of unconfirmed transactions, may be negative.
    pub unconfirmed_balance: BigInt,
    pub unconfirmed_txs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressUtxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: BigUint,
    /// `None` while unconfirmed.
    pub height: Option<u32>,
    pub confirmations: u32,
    pub asset: Option<AssetInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDetail {
    pub height: u32,
    pub hash: BlockHash,
    pub time: i64,
    pub size: u32,
    pub confirmations: u32,
    pub txids: Vec<Txid>,
}

pub struct QueryService {
    store: Arc<Store>,
    backend: Arc<dyn ChainBackend>,
    parser: Arc<dyn ChainParser>,
    mempool: Option<Arc<Mempool>>,
    status: SharedStatus,
    tx_cache: Mutex<LruCache<Txid, Tx>>,
}

impl QueryService {
    pub fn new(
        store: Arc<Store>,
        backend: Arc<dyn ChainBackend>,
        parser: Arc<dyn ChainParser>,
        mempool: Option<Arc<Mempool>>,
        status: SharedStatus,
        config: &CoinConfig,
    ) -> Self {
        let cache_size = NonZeroUsize::new(config.tx_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            backend,
            parser,
            mempool,
            status,
            tx_cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    fn best_height(&self) -> Option<u32> {
        self.store.best_block().map(|(height, _)| height)
    }

    fn confirmations(&self, height: u32) -> u32 {
        self.best_height()
            .map(|best| best.saturating_sub(height) + 1)
            .unwrap_or_default()
    }

    fn is_confirmed(&self, txid: &Txid) -> Result<bool> {
        Ok(self.store.tx_location(txid)?.is_some())
    }

    /// Unconfirmed transactions first, newest first, on the first page only,
    /// followed by one page of confirmed history.
    pub fn address_history(&self, address: &str, query: &HistoryQuery) -> Result<HistoryPage> {
        let desc = self.parser.addr_desc_from_address(address)?;
        let mut page = self.store.address_history(&desc, query)?;
        let Some(mempool) = &self.mempool else {
            return Ok(page);
        };
        if query.cursor.is_some() || query.to_height.is_some() {
            return Ok(page);
        }

        let confirmed: HashSet<Txid> = page.items.iter().map(|item| item.txid).collect();
        let mut items = Vec::new();
        for item in mempool.snapshot().address_history(&desc) {
            if confirmed.contains(&item.txid) || self.is_confirmed(&item.txid)? {
                continue;
            }
            items.push(item);
        }
        items.append(&mut page.items);
        page.items = items;
        Ok(page)
    }

    pub fn address_balance(&self, address: &str) -> Result<AddressSummary> {
        let desc = self.parser.addr_desc_from_address(address)?;
        let balance = self.store.addr_balance(&desc)?.unwrap_or_default();

        let mut unconfirmed_balance = BigInt::default();
        let mut unconfirmed_txs = 0;
        if let Some(mempool) = &self.mempool {
            for entry in mempool.snapshot().address_entries(&desc) {
                if self.is_confirmed(&entry.tx.txid)? {
                    continue;
                }
                unconfirmed_txs += 1;
                for output in entry.outputs.iter().filter(|o| o.addr_desc == desc) {
                    unconfirmed_balance += BigInt::from(output.value.clone());
                }
                for input in entry.inputs.iter().filter(|i| i.addr_desc == desc) {
                    unconfirmed_balance -= BigInt::from(input.value.clone());
                }
            }
        }

        Ok(AddressSummary {
            address: address.to_string(),
            total_received: &balance.balance + &balance.sent,
            balance: balance.balance,
            total_sent: balance.sent,
            txs: balance.txs,
            unconfirmed_balance,
            unconfirmed_txs,
        })
    }

    /// Spendable outputs of `address`. Confirmed outputs already spent in the
    /// mempool are left out; unconfirmed outputs come first.
    pub fn utxos(&self, address: &str, include_unconfirmed: bool) -> Result<Vec<AddressUtxo>> {
        let desc = self.parser.addr_desc_from_address(address)?;
        let balance = self.store.addr_balance(&desc)?.unwrap_or_default();
        let snapshot = self.mempool.as_ref().map(|mempool| mempool.snapshot());

        let mut utxos = Vec::new();
        if let (Some(snapshot), true) = (&snapshot, include_unconfirmed) {
            for (outpoint, output) in snapshot.address_outputs(&desc) {
                if self.is_confirmed(&outpoint.txid)? {
                    continue;
                }
                utxos.push(AddressUtxo {
                    txid: outpoint.txid,
                    vout: outpoint.vout,
                    value: output.value,
                    height: None,
                    confirmations: 0,
                    asset: output.asset,
                });
            }
        }

        for utxo in balance.utxos.into_iter().rev() {
            let spent_in_mempool = snapshot.as_ref().is_some_and(|snapshot| {
                snapshot
                    .spender(&OutPoint {
                        txid: utxo.txid,
                        vout: utxo.vout,
                    })
                    .is_some()
            });
            if spent_in_mempool {
                continue;
            }
            utxos.push(AddressUtxo {
                txid: utxo.txid,
                vout: utxo.vout,
                value: utxo.value,
                height: Some(utxo.height),
                confirmations: self.confirmations(utxo.height),
                asset: utxo.asset,
            });
        }
        Ok(utxos)
    }

    /// Confirmed copy from the index when there is one, otherwise the
    /// mempool's, otherwise whatever the backend knows.
    pub async fn tx(&self, txid: &Txid) -> Result<TxDetail> {
        if let Some(location) = self.store.tx_location(txid)? {
            return self.confirmed_tx(txid, location).await;
        }
        if let Some(entry) = self.mempool.as_ref().and_then(|m| m.snapshot().get(txid).cloned()) {
            return Ok(TxDetail {
                tx: entry.tx.clone(),
                block_height: None,
                block_time: None,
                confirmations: 0,
            });
        }
        let tx = self.backend.tx(txid).await?;
        Ok(TxDetail {
            tx,
            block_height: None,
            block_time: None,
            confirmations: 0,
        })
    }

    async fn confirmed_tx(&self, txid: &Txid, location: TxLocation) -> Result<TxDetail> {
        let block_time = self
            .store
            .block_info(location.height)?
            .map(|info| info.time);

        let tx = match self.store.transactions.get(txid)? {
            Some(packed) => self.parser.unpack_tx(&packed)?.0,
            None => self.cached_tx(txid).await?,
        };

        Ok(TxDetail {
            tx,
            block_height: Some(location.height),
            block_time,
            confirmations: self.confirmations(location.height),
        })
    }

    async fn cached_tx(&self, txid: &Txid) -> Result<Tx> {
        let cached = self.tx_cache.lock().get(txid).cloned();
        if let Some(tx) = cached {
            return Ok(tx);
        }
        debug!("tx {txid} not stored, asking the backend");
        let tx = self.backend.tx(txid).await?;
        self.tx_cache.lock().put(*txid, tx.clone());
        Ok(tx)
    }

    pub fn block(&self, height: u32) -> Result<BlockDetail> {
        let not_found = || {
            NotFoundSnafu {
                kind: NotFoundKind::Block,
            }
            .build()
        };
        let info = self.store.block_info(height)?.ok_or_else(not_found)?;
        let txids = self.store.block_txids(&info.hash)?.ok_or_else(not_found)?;
        Ok(BlockDetail {
            height,
            hash: info.hash,
            time: info.time,
            size: info.size,
            confirmations: self.confirmations(height),
            txids,
        })
    }

    pub fn best_block(&self) -> Option<(u32, BlockHash)> {
        self.store.best_block()
    }

    pub fn status(&self) -> SyncStatus {
        let mut status = self.status.read().clone();
        if let Some(mempool) = &self.mempool {
            status.mempool_size = mempool.size();
            status.mempool_healthy = mempool.is_healthy();
        }
        status
    }

    /// First ticker at or after `time` carrying `currency` (and `token`).
    pub fn fiat_ticker(&self, time: i64, currency: &str, token: &str) -> Result<FiatTicker> {
        self.store
            .find_ticker(time, currency, token)?
            .ok_or_else(|| {
                NotFoundSnafu {
                    kind: NotFoundKind::Ticker,
                }
                .build()
            })
    }

    pub fn fiat_last_ticker(&self, currency: &str, token: &str) -> Result<FiatTicker> {
        self.store
            .find_last_ticker(currency, token)?
            .ok_or_else(|| {
                NotFoundSnafu {
                    kind: NotFoundKind::Ticker,
                }
                .build()
            })
    }

    /// Every unconfirmed (txid, first seen), newest first.
    pub fn mempool_entries(&self) -> Vec<(Txid, i64)> {
        self.mempool
            .as_ref()
            .map(|mempool| mempool.snapshot().all_entries())
            .unwrap_or_default()
    }
}
