//! The chain follower: catches the store up with the backend, tails new
//! blocks and rewinds on reorgs. It is the only writer of block data.

mod backoff;
mod catchup;
mod reorg;

use std::{sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};

pub use self::backoff::Backoff;
use crate::{
    chain::{ChainBackend, ChainParser, Notification},
    config::CoinConfig,
    error::{Error, ParseBlockSnafu},
    indexer::BlockIndexer,
    mempool::Mempool,
    model::{Block, BlockHash, SyncState, SyncStatus},
    storage::Store,
    Result,
};

pub type SharedStatus = Arc<RwLock<SyncStatus>>;

/// Outcome of waiting in the tailing phase.
enum Wake {
    NewBlock,
    Shutdown,
}

pub struct ChainFollower {
    indexer: BlockIndexer,
    store: Arc<Store>,
    backend: Arc<dyn ChainBackend>,
    parser: Arc<dyn ChainParser>,
    mempool: Option<Arc<Mempool>>,
    status: SharedStatus,
    parse_blocks: bool,
    workers: usize,
    chunk: u32,
    max_reorg_depth: u32,
    poll_interval: Duration,
}

impl ChainFollower {
    pub fn new(
        store: Arc<Store>,
        backend: Arc<dyn ChainBackend>,
        parser: Arc<dyn ChainParser>,
        mempool: Option<Arc<Mempool>>,
        status: SharedStatus,
        config: &CoinConfig,
    ) -> Self {
        {
            let mut status = status.write();
            status.best_height = store.best_block().map(|(height, _)| height);
            status.best_hash = store.best_block().map(|(_, hash)| hash);
        }
        Self {
            indexer: BlockIndexer::new(
                Arc::clone(&store),
                Arc::clone(&parser),
                config.store_raw_txs,
            ),
            store,
            backend,
            parser,
            mempool,
            status,
            parse_blocks: config.parse_blocks,
            workers: config.sync_workers.max(1),
            chunk: config.sync_chunk,
            max_reorg_depth: config.max_reorg_depth,
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status.read().clone()
    }

    /// Follows the chain until `shutdown` fires or a fatal error occurs, then
    /// closes the store. Transient backend errors are retried with back-off.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut notifications = self.backend.subscribe();
        let mut listening = true;
        let mut backoff = Backoff::default();

        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            match self.resync(&shutdown).await {
                Ok(()) => backoff.reset(),
                Err(Error::Shutdown) => break Ok(()),
                Err(e) if e.is_transient() => {
                    let delay = backoff.next_delay();
                    warn!("sync interrupted: {e}, retrying in {delay:?}");
                    self.set_error(&e);
                    tokio::select! {
                        _ = shutdown.changed() => break Ok(()),
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
                Err(e) => {
                    error!("sync stopped: {e}");
                    self.set_error(&e);
                    break Err(e);
                }
            }

            match self
                .wait_for_block(&mut notifications, &mut listening, &mut shutdown)
                .await
            {
                Wake::NewBlock => {}
                Wake::Shutdown => break Ok(()),
            }
        };

        info!("chain follower stopping");
        self.store.close()?;
        result
    }

    async fn wait_for_block(
        &self,
        notifications: &mut broadcast::Receiver<Notification>,
        listening: &mut bool,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Wake {
        let poll = tokio::time::sleep(self.poll_interval);
        tokio::pin!(poll);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Wake::Shutdown,
                _ = &mut poll => return Wake::NewBlock,
                notification = notifications.recv(), if *listening => match notification {
                    Ok(Notification::NewBlock(hash)) => {
                        debug!("block notification {hash:?}");
                        return Wake::NewBlock;
                    }
                    Ok(Notification::NewTx(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => return Wake::NewBlock,
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!(
                            "notification channel closed, polling every {:?}",
                            self.poll_interval
                        );
                        *listening = false;
                    }
                },
            }
        }
    }

    /// Full or thin fetch of block `hash`, depending on `parse_blocks`.
    async fn fetch_block(&self, hash: &BlockHash, height: u32) -> Result<Block> {
        let block = if self.parse_blocks {
            let bytes = self.backend.block_bytes(hash).await?;
            self.parser.parse_block(&bytes, height)
        } else {
            self.backend.block(hash, height).await
        };
        block.map_err(|e| match e.kind() {
            crate::error::ErrorKind::Parse => {
                error!("unable to parse block {hash} at {height}: {e}");
                ParseBlockSnafu {
                    hash: hash.to_string(),
                    reason: e.to_string(),
                }
                .build()
            }
            _ => e,
        })
    }

    fn connect(&self, block: &Block) -> Result<()> {
        self.indexer.index_block(block)?;
        let txids: Vec<_> = block.txs.iter().map(|tx| tx.txid).collect();
        if let Some(mempool) = &self.mempool {
            mempool.remove_block_txs(&txids);
        }
        let mut status = self.status.write();
        status.best_height = Some(block.height());
        status.best_hash = Some(block.hash());
        status.last_block_time = Some(block.header.time);
        Ok(())
    }

    fn set_synced(&self, backend_height: u32) {
        let mut status = self.status.write();
        if status.initial_sync {
            info!("initial sync finished at {:?}", status.best_height);
        }
        status.state = SyncState::Synced;
        status.initial_sync = false;
        status.backend_height = Some(backend_height);
        status.last_sync_time = Some(chrono::Utc::now().timestamp());
        status.last_error = None;
    }

    fn set_error(&self, e: &Error) {
        let mut status = self.status.write();
        status.state = SyncState::Error;
        status.last_error = Some(e.to_string());
    }
}
