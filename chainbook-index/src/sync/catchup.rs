use futures::{stream, StreamExt};
use log::{debug, info};
use tokio::sync::watch;

use super::ChainFollower;
use crate::{
    error::Error,
    model::{Block, SyncState},
    Result,
};

/// Where the next block goes, after reconciling the local tip with the
/// backend.
enum Cursor {
    Next(u32),
    Forked,
}

impl ChainFollower {
    /// Connects every block the backend has beyond the local tip, rewinding
    /// first when the tip is no longer on the backend's chain. Returns once
    /// the store has caught up.
    pub async fn resync(&self, shutdown: &watch::Receiver<bool>) -> Result<()> {
        loop {
            let info = self.backend.chain_info().await?;
            self.status.write().backend_height = Some(info.blocks);

            let next = match self.cursor().await? {
                Cursor::Next(next) => next,
                Cursor::Forked => {
                    self.handle_fork().await?;
                    continue;
                }
            };
            if next > info.blocks {
                self.set_synced(info.blocks);
                return Ok(());
            }

            let before = self.store.best_block();
            let missing = info.blocks - next + 1;
            let complete = if missing > self.chunk {
                info!(
                    "catching up {missing} blocks from {next} with {} workers",
                    self.workers
                );
                self.status.write().state = SyncState::Syncing;
                self.connect_parallel(next, info.blocks, shutdown).await?
            } else {
                self.connect_sequential(next, info.blocks, shutdown).await?
            };
            let tip = self.store.best_block();
            if complete && tip.map(|(h, _)| h) == Some(info.blocks) {
                self.set_synced(info.blocks);
                return Ok(());
            }
            // nothing connected and no fork: wait for the backend
            if tip == before && matches!(self.cursor().await?, Cursor::Next(_)) {
                return Ok(());
            }
        }
    }

    async fn cursor(&self) -> Result<Cursor> {
        let Some((height, hash)) = self.store.best_block() else {
            return Ok(Cursor::Next(self.store.start_height()));
        };
        match self.backend.block_hash(height).await {
            Ok(backend_hash) if backend_hash == hash => Ok(Cursor::Next(height + 1)),
            Ok(_) => Ok(Cursor::Forked),
            // the backend chain got shorter than ours
            Err(e) if e.is_not_found() => Ok(Cursor::Forked),
            Err(e) => Err(e),
        }
    }

    /// Fetches one block at a time. Returns false when it stopped early on a
    /// block that does not extend the tip or is not produced yet.
    async fn connect_sequential(
        &self,
        from: u32,
        to: u32,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<bool> {
        for height in from..=to {
            if *shutdown.borrow() {
                return Err(Error::Shutdown);
            }
            let hash = match self.backend.block_hash(height).await {
                Ok(hash) => hash,
                Err(e) if e.is_not_found() => {
                    debug!("block {height} is not produced yet");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            let block = self.fetch_block(&hash, height).await?;
            if !self.extends_tip(&block) {
                return Ok(false);
            }
            self.connect(&block)?;
        }
        Ok(true)
    }

    /// Fetches and parses up to `workers` blocks ahead of the writer, which
    /// connects them strictly in height order.
    async fn connect_parallel(
        &self,
        from: u32,
        to: u32,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<bool> {
        let mut blocks = stream::iter(from..=to)
            .map(|height| async move {
                let hash = self.backend.block_hash(height).await?;
                self.fetch_block(&hash, height).await
            })
            .buffered(self.workers);

        while let Some(block) = blocks.next().await {
            if *shutdown.borrow() {
                return Err(Error::Shutdown);
            }
            let block = match block {
                Ok(block) => block,
                Err(e) if e.is_not_found() => return Ok(false),
                Err(e) => return Err(e),
            };
            if !self.extends_tip(&block) {
                return Ok(false);
            }
            self.connect(&block)?;
        }
        Ok(true)
    }

    fn extends_tip(&self, block: &Block) -> bool {
        match self.store.best_block() {
            Some((height, hash)) => {
                let extends = block.header.prev_hash == hash && block.height() == height + 1;
                if !extends {
                    debug!(
                        "block {} at {} does not extend {hash} at {height}",
                        block.hash(),
                        block.height()
                    );
                }
                extends
            }
            None => block.height() == self.store.start_height(),
        }
    }
}
