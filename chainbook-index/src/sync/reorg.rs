use log::{info, warn};

use super::ChainFollower;
use crate::{error::ReorgTooDeepSnafu, Result};

impl ChainFollower {
    /// Disconnects local blocks until the tip is again on the backend's
    /// chain. Their txs become mempool candidates.
    pub(super) async fn handle_fork(&self) -> Result<()> {
        let mut depth = 0;
        while let Some((height, hash)) = self.store.best_block() {
            match self.backend.block_hash(height).await {
                Ok(backend_hash) if backend_hash == hash => break,
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            if depth >= self.max_reorg_depth {
                return ReorgTooDeepSnafu {
                    max_depth: self.max_reorg_depth,
                }
                .fail();
            }

            warn!("block {hash} at {height} is no longer on the backend chain, disconnecting");
            let txids = self.indexer.invalidate_block(&hash)?;
            if let Some(mempool) = &self.mempool {
                mempool.add_candidates(&txids);
            }
            depth += 1;

            let mut status = self.status.write();
            status.best_height = self.store.best_block().map(|(h, _)| h);
            status.best_hash = self.store.best_block().map(|(_, h)| h);
        }
        info!(
            "reorg of depth {depth} resolved, tip {:?}",
            self.store.best_block()
        );
        Ok(())
    }
}
