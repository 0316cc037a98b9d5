//! Deterministic fixtures for unit tests: an in-memory chain backend, a parser
//! whose address descriptors are the address strings' bytes, and builders.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use num::BigUint;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::broadcast;

use crate::{
    chain::{BackendFeatures, ChainBackend, ChainInfo, ChainParser, Notification},
    config::CoinConfig,
    error::{BackendSnafu, InvalidAddressSnafu, NotFoundKind, NotFoundSnafu, ParseTxSnafu},
    model::{
        AddrDesc, AssetDefinition, AssetInfo, Block, BlockHash, BlockHeader, BlockSummary, Hash256,
        OutPoint, Tx, Txid, Vin, Vout,
    },
    storage::Store,
    Result,
};

pub const COIN: &str = "Test";

pub fn txid(seed: u64) -> Txid {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&seed.to_le_bytes());
    bytes[31] = 0x7a;
    Hash256(bytes)
}

pub fn block_hash(seed: u64) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&seed.to_le_bytes());
    bytes[31] = 0xb1;
    Hash256(bytes)
}

pub fn outpoint(seed: u64, vout: u32) -> OutPoint {
    OutPoint {
        txid: txid(seed),
        vout,
    }
}

pub fn desc(address: &str) -> AddrDesc {
    AddrDesc(address.as_bytes().to_vec())
}

fn seal(mut tx: Tx) -> Tx {
    tx.raw = Vec::new();
    tx.raw = bincode::serialize(&tx).unwrap();
    tx
}

/// Transaction `seed` spending `inputs` (a coinbase when empty) and paying
/// `outputs` as (address, value).
pub fn tx(seed: u64, inputs: &[OutPoint], outputs: &[(&str, u64)]) -> Tx {
    let vin = if inputs.is_empty() {
        vec![Vin {
            prev: None,
            script_sig: seed.to_le_bytes().to_vec(),
            sequence: u32::MAX,
        }]
    } else {
        inputs
            .iter()
            .map(|prev| Vin {
                prev: Some(*prev),
                script_sig: Vec::new(),
                sequence: u32::MAX,
            })
            .collect()
    };
    let vout = outputs
        .iter()
        .enumerate()
        .map(|(n, (address, value))| Vout {
            value: BigUint::from(*value),
            n: n as u32,
            script: address.as_bytes().to_vec(),
            asset: None,
        })
        .collect();
    seal(Tx {
        txid: txid(seed),
        version: 2,
        lock_time: 0,
        vin,
        vout,
        raw: Vec::new(),
    })
}

/// Attaches `value` of asset `guid` to output `n`.
pub fn with_asset(mut tx: Tx, n: usize, guid: u64, value: u64) -> Tx {
    tx.vout[n].asset = Some(AssetInfo {
        guid,
        value: BigUint::from(value),
    });
    seal(tx)
}

pub fn block(seed: u64, height: u32, prev_hash: BlockHash, txs: Vec<Tx>) -> Block {
    Block {
        header: BlockHeader {
            hash: block_hash(seed),
            prev_hash,
            height,
            time: 1_700_000_000 + i64::from(height) * 600,
            size: 80 + txs.iter().map(|tx| tx.raw.len() as u32).sum::<u32>(),
        },
        txs,
    }
}

pub fn genesis() -> Block {
    block(0, 0, BlockHash::default(), vec![tx(0, &[], &[("genesis", 50)])])
}

pub fn temp_store() -> (TempDir, Arc<Store>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path(), COIN, 0, 8).unwrap();
    (dir, Arc::new(store))
}

pub fn test_config() -> CoinConfig {
    CoinConfig {
        coin_name: COIN.to_string(),
        coin_shortcut: "TST".to_string(),
        rpc_url: "http://127.0.0.1:1".to_string(),
        sync_workers: 2,
        sync_chunk: 3,
        mempool_workers: 2,
        mempool_max_deferred_attempts: 2,
        max_reorg_depth: 10,
        poll_interval_secs: 1,
        mempool_refresh_secs: 1,
        ..Default::default()
    }
}

/// Parses the bincode form the builders emit. Descriptors are the address
/// strings' bytes.
#[derive(Debug, Default)]
pub struct TestParser {
    assets: BTreeMap<Txid, AssetDefinition>,
}

impl TestParser {
    pub fn with_assets(definitions: Vec<(Txid, AssetDefinition)>) -> Self {
        Self {
            assets: definitions.into_iter().collect(),
        }
    }
}

impl ChainParser for TestParser {
    fn addr_desc_from_address(&self, address: &str) -> Result<AddrDesc> {
        if address.is_empty() {
            return InvalidAddressSnafu {
                address,
                reason: "empty",
            }
            .fail();
        }
        Ok(desc(address))
    }

    fn addresses_from_addr_desc(&self, desc: &AddrDesc) -> Result<(Vec<String>, bool)> {
        match std::str::from_utf8(desc.as_bytes()) {
            Ok(address) => Ok((vec![address.to_string()], true)),
            Err(_) => Ok((Vec::new(), false)),
        }
    }

    fn addr_desc_from_vout(&self, vout: &Vout) -> Result<AddrDesc> {
        Ok(AddrDesc(vout.script.clone()))
    }

    fn parse_block(&self, bytes: &[u8], _height: u32) -> Result<Block> {
        bincode::deserialize(bytes).map_err(|e| {
            ParseTxSnafu {
                reason: e.to_string(),
            }
            .build()
        })
    }

    fn parse_tx(&self, bytes: &[u8]) -> Result<Tx> {
        let mut tx: Tx = bincode::deserialize(bytes).map_err(|e| {
            ParseTxSnafu {
                reason: e.to_string(),
            }
            .build()
        })?;
        tx.raw = bytes.to_vec();
        Ok(tx)
    }

    fn asset_support(&self) -> bool {
        !self.assets.is_empty()
    }

    fn asset_definition(&self, tx: &Tx) -> Option<AssetDefinition> {
        self.assets.get(&tx.txid).cloned()
    }
}

/// In-memory node. Height `n` of the chain is `chain[n]`.
pub struct FakeBackend {
    chain: Mutex<Vec<Block>>,
    mempool: Mutex<Vec<Tx>>,
    failing: AtomicBool,
    notifications: broadcast::Sender<Notification>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(64);
        Self {
            chain: Mutex::new(vec![genesis()]),
            mempool: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            notifications,
        }
    }

    pub fn tip(&self) -> Block {
        self.chain.lock().last().cloned().unwrap()
    }

    pub fn height(&self) -> u32 {
        self.chain.lock().len() as u32 - 1
    }

    /// Appends a block with `txs` on the tip and drops them from the mempool.
    pub fn mine(&self, seed: u64, txs: Vec<Tx>) -> Block {
        let mut chain = self.chain.lock();
        let tip = chain.last().unwrap();
        let block = block(seed, tip.height() + 1, tip.hash(), txs);
        self.mempool
            .lock()
            .retain(|tx| !block.txs.iter().any(|mined| mined.txid == tx.txid));
        chain.push(block.clone());
        let _ = self
            .notifications
            .send(Notification::NewBlock(Some(block.hash())));
        block
    }

    /// Drops every block above `height`.
    pub fn rewind(&self, height: u32) {
        self.chain.lock().truncate(height as usize + 1);
    }

    pub fn add_mempool_tx(&self, tx: Tx) {
        let txid = tx.txid;
        self.mempool.lock().push(tx);
        let _ = self.notifications.send(Notification::NewTx(Some(txid)));
    }

    pub fn remove_mempool_tx(&self, txid: &Txid) {
        self.mempool.lock().retain(|tx| tx.txid != *txid);
    }

    /// Makes every call fail with a transient error until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self, method: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return BackendSnafu {
                method,
                msg: "connection refused",
            }
            .fail();
        }
        Ok(())
    }

    fn find_block(&self, hash: &BlockHash) -> Result<Block> {
        self.chain
            .lock()
            .iter()
            .find(|block| block.hash() == *hash)
            .cloned()
            .ok_or_else(|| {
                NotFoundSnafu {
                    kind: NotFoundKind::Block,
                }
                .build()
            })
    }
}

#[async_trait]
impl ChainBackend for FakeBackend {
    async fn chain_info(&self) -> Result<ChainInfo> {
        self.check("getblockchaininfo")?;
        let tip = self.tip();
        Ok(ChainInfo {
            chain: "test".to_string(),
            blocks: tip.height(),
            best_block_hash: tip.hash(),
            version: "fake".to_string(),
            initial_block_download: false,
        })
    }

    async fn block_hash(&self, height: u32) -> Result<BlockHash> {
        self.check("getblockhash")?;
        self.chain
            .lock()
            .get(height as usize)
            .map(|block| block.hash())
            .ok_or_else(|| {
                NotFoundSnafu {
                    kind: NotFoundKind::Block,
                }
                .build()
            })
    }

    async fn block_summary(&self, hash: &BlockHash) -> Result<BlockSummary> {
        self.check("getblock")?;
        let block = self.find_block(hash)?;
        Ok(BlockSummary {
            txids: block.txs.iter().map(|tx| tx.txid).collect(),
            header: block.header,
        })
    }

    async fn block(&self, hash: &BlockHash, _height: u32) -> Result<Block> {
        self.check("getblock")?;
        self.find_block(hash)
    }

    async fn block_bytes(&self, hash: &BlockHash) -> Result<Vec<u8>> {
        self.check("getblock")?;
        Ok(bincode::serialize(&self.find_block(hash)?).unwrap())
    }

    async fn tx(&self, txid: &Txid) -> Result<Tx> {
        self.check("getrawtransaction")?;
        if let Some(tx) = self.mempool.lock().iter().find(|tx| tx.txid == *txid) {
            return Ok(tx.clone());
        }
        self.chain
            .lock()
            .iter()
            .flat_map(|block| block.txs.iter())
            .find(|tx| tx.txid == *txid)
            .cloned()
            .ok_or_else(|| {
                NotFoundSnafu {
                    kind: NotFoundKind::Tx,
                }
                .build()
            })
    }

    async fn mempool_txids(&self) -> Result<Vec<Txid>> {
        self.check("getrawmempool")?;
        Ok(self.mempool.lock().iter().map(|tx| tx.txid).collect())
    }

    async fn send_raw_transaction(&self, hex: &str) -> Result<Txid> {
        self.check("sendrawtransaction")?;
        let tx = TestParser::default().parse_tx(&hex::decode(hex)?)?;
        let txid = tx.txid;
        self.add_mempool_tx(tx);
        Ok(txid)
    }

    fn features(&self) -> BackendFeatures {
        BackendFeatures::default()
    }

    fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    fn notifier(&self) -> Option<broadcast::Sender<Notification>> {
        Some(self.notifications.clone())
    }
}
