#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use num::BigUint;
    use tokio::sync::watch;

    use crate::{
        chain::ChainBackend,
        indexer::BlockIndexer,
        mempool::Mempool,
        model::{OutPoint, TxDirection},
        storage::Store,
        testing::*,
    };

    /// Store holding genesis and a block paying 1000 to A at outpoint 100:0.
    fn funded_store() -> (tempfile::TempDir, Arc<Store>) {
        let (dir, store) = temp_store();
        let indexer = BlockIndexer::new(Arc::clone(&store), Arc::new(TestParser::default()), false);
        let g = genesis();
        indexer.index_block(&g).unwrap();
        indexer
            .index_block(&block(1, 1, g.hash(), vec![tx(100, &[], &[("A", 1000)])]))
            .unwrap();
        (dir, store)
    }

    fn mempool(store: &Arc<Store>, backend: &Arc<FakeBackend>) -> Mempool {
        Mempool::new(
            Arc::clone(store),
            Arc::clone(backend) as Arc<dyn ChainBackend>,
            Arc::new(TestParser::default()),
            &test_config(),
        )
    }

    #[tokio::test]
    async fn test_chained_unconfirmed_txs_resolve() {
        let (_dir, store) = funded_store();
        let backend = Arc::new(FakeBackend::new());
        let mempool = mempool(&store, &backend);

        // child listed before its parent
        let t2 = tx(2, &[outpoint(1, 0)], &[("D", 390)]);
        let t1 = tx(1, &[outpoint(100, 0)], &[("A", 400), ("B", 600)]);
        backend.add_mempool_tx(t2);
        backend.add_mempool_tx(t1);

        assert_eq!(mempool.resync().await.unwrap(), 2);
        let snapshot = mempool.snapshot();
        assert_eq!(snapshot.spender(&outpoint(100, 0)), Some(txid(1)));
        assert_eq!(snapshot.spender(&outpoint(1, 0)), Some(txid(2)));

        let child = snapshot.get(&txid(2)).unwrap();
        assert_eq!(child.inputs[0].addr_desc, desc("A"));
        assert_eq!(child.inputs[0].value, BigUint::from(400u32));

        let a: Vec<_> = snapshot
            .address_history(&desc("A"))
            .into_iter()
            .map(|item| (item.txid, item.direction))
            .collect();
        assert!(a.contains(&(txid(1), TxDirection::Both)));
        assert!(a.contains(&(txid(2), TxDirection::Input)));
        // A's change is spent by the child, B's coin is not
        assert!(snapshot.address_outputs(&desc("A")).is_empty());
        let b = snapshot.address_outputs(&desc("B"));
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].0, OutPoint { txid: txid(1), vout: 1 });
    }

    #[tokio::test]
    async fn test_unknown_parent_is_deferred_then_indexed() {
        let (_dir, store) = funded_store();
        let backend = Arc::new(FakeBackend::new());
        let mempool = mempool(&store, &backend);

        backend.add_mempool_tx(tx(5, &[outpoint(404, 0)], &[("E", 1)]));
        assert_eq!(mempool.resync().await.unwrap(), 0);
        assert!(!mempool.snapshot().contains(&txid(5)));

        // the attempt limit is 2 in the test config
        assert_eq!(mempool.resync().await.unwrap(), 1);
        let snapshot = mempool.snapshot();
        let entry = snapshot.get(&txid(5)).unwrap();
        assert!(!entry.inputs[0].is_resolved());
        assert_eq!(snapshot.address_history(&desc("E")).len(), 1);
    }

    #[tokio::test]
    async fn test_deferred_tx_resolves_when_parent_arrives() {
        let (_dir, store) = funded_store();
        let backend = Arc::new(FakeBackend::new());
        let mempool = mempool(&store, &backend);

        backend.add_mempool_tx(tx(2, &[outpoint(1, 0)], &[("D", 1)]));
        mempool.resync().await.unwrap();
        backend.add_mempool_tx(tx(1, &[outpoint(100, 0)], &[("A", 1000)]));
        assert_eq!(mempool.resync().await.unwrap(), 2);
        let snapshot = mempool.snapshot();
        assert!(snapshot.get(&txid(2)).unwrap().inputs[0].is_resolved());
    }

    #[tokio::test]
    async fn test_block_txs_are_evicted() {
        let (_dir, store) = funded_store();
        let backend = Arc::new(FakeBackend::new());
        let mempool = mempool(&store, &backend);
        backend.add_mempool_tx(tx(1, &[outpoint(100, 0)], &[("B", 1000)]));
        backend.add_mempool_tx(tx(3, &[], &[("F", 1)]));
        mempool.resync().await.unwrap();
        assert_eq!(mempool.size(), 2);

        mempool.remove_block_txs(&[txid(1), txid(77)]);
        let snapshot = mempool.snapshot();
        assert!(!snapshot.contains(&txid(1)));
        assert!(snapshot.address_history(&desc("B")).is_empty());
        assert_eq!(snapshot.spender(&outpoint(100, 0)), None);
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_txs_gone_from_backend_are_dropped() {
        let (_dir, store) = funded_store();
        let backend = Arc::new(FakeBackend::new());
        let mempool = mempool(&store, &backend);
        backend.add_mempool_tx(tx(3, &[], &[("F", 1)]));
        mempool.resync().await.unwrap();
        backend.remove_mempool_tx(&txid(3));
        assert_eq!(mempool.resync().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_confirmed_txs_are_not_indexed() {
        let (_dir, store) = funded_store();
        let backend = Arc::new(FakeBackend::new());
        let mempool = mempool(&store, &backend);
        // txid 100 is already in block 1
        backend.add_mempool_tx(tx(100, &[], &[("A", 1000)]));
        assert_eq!(mempool.resync().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failures_keep_snapshot_and_flip_health() {
        let (_dir, store) = funded_store();
        let backend = Arc::new(FakeBackend::new());
        let mempool = mempool(&store, &backend);
        backend.add_mempool_tx(tx(3, &[], &[("F", 1)]));
        mempool.resync().await.unwrap();

        backend.set_failing(true);
        for _ in 0..3 {
            assert!(mempool.resync().await.unwrap_err().is_transient());
        }
        assert!(!mempool.is_healthy());
        assert_eq!(mempool.size(), 1);

        backend.set_failing(false);
        mempool.resync().await.unwrap();
        assert!(mempool.is_healthy());
    }

    #[tokio::test]
    async fn test_all_entries_newest_first() {
        let (_dir, store) = funded_store();
        let backend = Arc::new(FakeBackend::new());
        let mempool = mempool(&store, &backend);
        backend.add_mempool_tx(tx(3, &[], &[("F", 1)]));
        mempool.resync().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        backend.add_mempool_tx(tx(4, &[], &[("F", 1)]));
        mempool.resync().await.unwrap();

        let entries = mempool.snapshot().all_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, txid(4));
        assert!(entries[0].1 > entries[1].1);
    }

    #[tokio::test]
    async fn test_disconnected_txs_are_readded() {
        let (_dir, store) = funded_store();
        let backend = Arc::new(FakeBackend::new());
        let mempool = mempool(&store, &backend);
        let indexer = BlockIndexer::new(Arc::clone(&store), Arc::new(TestParser::default()), false);

        let b1 = block(1, 1, genesis().hash(), vec![tx(100, &[], &[("A", 1000)])]);
        let b2 = block(
            2,
            2,
            b1.hash(),
            vec![
                tx(200, &[], &[("miner", 50)]),
                tx(7, &[outpoint(100, 0)], &[("C", 900)]),
            ],
        );
        indexer.index_block(&b2).unwrap();
        backend.add_mempool_tx(tx(7, &[outpoint(100, 0)], &[("C", 900)]));
        assert_eq!(mempool.resync().await.unwrap(), 0);

        let txids = indexer.invalidate_block(&b2.hash()).unwrap();
        assert!(txids.contains(&txid(7)));
        mempool.add_candidates(&txids);

        assert_eq!(mempool.resync().await.unwrap(), 1);
        let snapshot = mempool.snapshot();
        let entry = snapshot.get(&txid(7)).unwrap();
        assert_eq!(entry.inputs[0].addr_desc, desc("A"));
        assert_eq!(entry.inputs[0].value, BigUint::from(1000u32));
        // the coinbase is not in the backend mempool
        assert!(!snapshot.contains(&txid(200)));
        assert!(mempool.candidates.lock().is_empty());
    }

    #[tokio::test]
    async fn test_known_candidate_is_parsed_again() {
        let (_dir, store) = funded_store();
        let backend = Arc::new(FakeBackend::new());
        let mempool = mempool(&store, &backend);

        // indexed with an unresolved input after the attempt limit
        backend.add_mempool_tx(tx(5, &[outpoint(404, 0)], &[("E", 1)]));
        mempool.resync().await.unwrap();
        mempool.resync().await.unwrap();
        assert!(!mempool.snapshot().get(&txid(5)).unwrap().inputs[0].is_resolved());

        // its parent shows up in the mempool, then tx 5 comes back from a reorg
        backend.add_mempool_tx(tx(404, &[outpoint(100, 0)], &[("G", 1000)]));
        mempool.add_candidates(&[txid(5)]);
        assert_eq!(mempool.resync().await.unwrap(), 2);
        let snapshot = mempool.snapshot();
        let entry = snapshot.get(&txid(5)).unwrap();
        assert_eq!(entry.inputs[0].addr_desc, desc("G"));
        assert_eq!(snapshot.address_history(&desc("G")).len(), 2);
    }

    #[tokio::test]
    async fn test_refresher_keeps_running_after_failures() {
        let (_dir, store) = funded_store();
        let backend = Arc::new(FakeBackend::new());
        let mempool = Arc::new(mempool(&store, &backend));
        backend.set_failing(true);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&mempool).run(
            backend.subscribe(),
            Duration::from_millis(20),
            shutdown_rx,
        ));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!mempool.is_healthy());

        backend.set_failing(false);
        backend.add_mempool_tx(tx(3, &[], &[("F", 1)]));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(mempool.is_healthy());
        assert_eq!(mempool.size(), 1);

        shutdown.send(true).unwrap();
        task.await.unwrap();
    }
}
