#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, sync::Arc};

    use num::BigUint;

    use crate::{
        error::Error,
        indexer::BlockIndexer,
        model::{AddrBalance, AssetDefinition, Block, TxDirection, Utxo},
        storage::{HistoryQuery, RepositoryOps, SortOrder, Store},
        testing::*,
    };

    const COINBASE: u64 = 5_000_000_000;

    fn indexer(store: &Arc<Store>) -> BlockIndexer {
        BlockIndexer::new(Arc::clone(store), Arc::new(TestParser::default()), true)
    }

    fn balance(store: &Store, address: &str) -> Option<AddrBalance> {
        store.addr_balance(&desc(address)).unwrap()
    }

    /// G, then B1 paying A, then B2 moving all of A to B.
    fn s2_chain() -> Vec<Block> {
        let g = genesis();
        let b1 = block(1, 1, g.hash(), vec![tx(100, &[], &[("A", COINBASE)])]);
        let b2 = block(
            2,
            2,
            b1.hash(),
            vec![
                tx(200, &[], &[("miner", COINBASE)]),
                tx(201, &[outpoint(100, 0)], &[("B", COINBASE)]),
            ],
        );
        vec![g, b1, b2]
    }

    /// Every address balance matches its utxos, and its tx count matches the
    /// distinct txs in its history rows.
    fn assert_balance_identity(store: &Store) {
        for item in store.address_balance.list(None, SortOrder::Ascending).unwrap() {
            let (desc, balance) = item.unwrap();
            assert_eq!(balance.balance, balance.utxo_sum(), "{desc:?}");

            let mut txs = BTreeSet::new();
            for row in store.addresses.list(None, SortOrder::Ascending).unwrap() {
                let ((row_desc, height), entries) = row.unwrap();
                if row_desc == desc {
                    txs.extend(entries.iter().map(|e| (height, e.tx_index)));
                }
            }
            assert_eq!(balance.txs as usize, txs.len(), "{desc:?}");
        }
    }

    #[test]
    fn test_single_coinbase_credits_address() {
        let (_dir, store) = temp_store();
        let indexer = indexer(&store);
        let chain = s2_chain();
        indexer.index_block(&chain[0]).unwrap();
        indexer.index_block(&chain[1]).unwrap();

        let a = balance(&store, "A").unwrap();
        assert_eq!(a.txs, 1);
        assert_eq!(a.sent, BigUint::default());
        assert_eq!(a.balance, BigUint::from(COINBASE));
        assert_eq!(
            a.utxos,
            vec![Utxo {
                txid: txid(100),
                vout: 0,
                height: 1,
                value: BigUint::from(COINBASE),
                asset: None,
            }]
        );

        let page = store
            .address_history(&desc("A"), &HistoryQuery::default())
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].txid, txid(100));
        assert_eq!(page.items[0].height, Some(1));
        assert_eq!(page.items[0].direction, TxDirection::Output);
        assert_eq!(store.best_block(), Some((1, chain[1].hash())));
    }

    #[test]
    fn test_spend_moves_balance() {
        let (_dir, store) = temp_store();
        let indexer = indexer(&store);
        for block in s2_chain() {
            indexer.index_block(&block).unwrap();
        }

        let a = balance(&store, "A").unwrap();
        assert_eq!(a.txs, 2);
        assert_eq!(a.sent, BigUint::from(COINBASE));
        assert_eq!(a.balance, BigUint::default());
        assert!(a.utxos.is_empty());

        let b = balance(&store, "B").unwrap();
        assert_eq!(b.txs, 1);
        assert_eq!(b.sent, BigUint::default());
        assert_eq!(b.balance, BigUint::from(COINBASE));

        let funding = store.tx_addresses(&txid(100)).unwrap().unwrap();
        assert!(funding.outputs[0].spent);
        let spending = store.tx_addresses(&txid(201)).unwrap().unwrap();
        assert_eq!(spending.inputs[0].addr_desc, desc("A"));
        assert_eq!(store.tx_location(&txid(201)).unwrap().unwrap().position, 1);
        assert_balance_identity(&store);
    }

    #[test]
    fn test_disconnect_restores_exact_state() {
        let (_dir, store) = temp_store();
        let indexer = indexer(&store);
        let chain = s2_chain();
        indexer.index_block(&chain[0]).unwrap();
        let before = store.hash_db_state().unwrap();

        let b3 = block(
            3,
            3,
            chain[2].hash(),
            vec![
                tx(300, &[], &[("miner", COINBASE)]),
                // B splits to itself and C, then C pays A inside the same block
                tx(301, &[outpoint(201, 0)], &[("B", 1_000), ("C", COINBASE - 1_000)]),
                tx(302, &[outpoint(301, 1)], &[("A", 10), ("", COINBASE - 1_010)]),
            ],
        );
        let blocks = [&chain[1], &chain[2], &b3];
        for block in blocks {
            indexer.index_block(block).unwrap();
        }
        assert_balance_identity(&store);
        assert_eq!(balance(&store, "C").unwrap().txs, 2);

        for block in blocks.iter().rev() {
            let txids = indexer.invalidate_block(&block.hash()).unwrap();
            assert_eq!(txids.len(), block.txs.len());
            assert_balance_identity(&store);
        }
        assert_eq!(store.hash_db_state().unwrap(), before);
        assert!(balance(&store, "A").is_none());
        assert_eq!(store.best_block(), Some((0, chain[0].hash())));
    }

    #[test]
    fn test_disconnect_genesis_empties_store() {
        let (_dir, store) = temp_store();
        let indexer = indexer(&store);
        let before = store.hash_db_state().unwrap();
        let g = genesis();
        indexer.index_block(&g).unwrap();
        indexer.invalidate_block(&g.hash()).unwrap();
        assert_eq!(store.best_block(), None);
        assert_eq!(store.hash_db_state().unwrap(), before);
    }

    #[test]
    fn test_block_must_extend_tip() {
        let (_dir, store) = temp_store();
        let indexer = indexer(&store);
        let chain = s2_chain();
        let err = indexer.index_block(&chain[1]).unwrap_err();
        assert!(matches!(err, Error::PrevHashMismatch { height: 1, .. }));

        indexer.index_block(&chain[0]).unwrap();
        let stray = block(9, 1, block_hash(77), vec![tx(900, &[], &[("A", 1)])]);
        let err = indexer.index_block(&stray).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        // nothing of the rejected block was written
        assert!(store.tx_addresses(&txid(900)).unwrap().is_none());
    }

    #[test]
    fn test_disconnect_without_block_txs_fails() {
        let (_dir, store) = temp_store();
        let indexer = indexer(&store);
        let chain = s2_chain();
        indexer.index_block(&chain[0]).unwrap();
        indexer.index_block(&chain[1]).unwrap();
        store.block_txs.delete(&chain[1].hash()).unwrap();

        let err = indexer.invalidate_block(&chain[1].hash()).unwrap_err();
        assert!(matches!(err, Error::DisconnectNotInvertible { .. }));
        assert_eq!(store.best_block(), Some((1, chain[1].hash())));
    }

    #[test]
    fn test_only_tip_can_be_disconnected() {
        let (_dir, store) = temp_store();
        let indexer = indexer(&store);
        let chain = s2_chain();
        for block in &chain {
            indexer.index_block(block).unwrap();
        }
        assert!(indexer.invalidate_block(&chain[1].hash()).is_err());
    }

    #[test]
    fn test_unknown_input_is_recorded_unresolved() {
        let (_dir, store) = temp_store();
        let indexer = indexer(&store);
        let g = genesis();
        indexer.index_block(&g).unwrap();
        let before = store.hash_db_state().unwrap();
        let b1 = block(
            1,
            1,
            g.hash(),
            vec![
                tx(100, &[], &[("miner", COINBASE)]),
                tx(101, &[outpoint(999, 0)], &[("D", 7)]),
            ],
        );
        indexer.index_block(&b1).unwrap();

        let ta = store.tx_addresses(&txid(101)).unwrap().unwrap();
        assert!(!ta.inputs[0].is_resolved());
        assert_eq!(balance(&store, "D").unwrap().balance, BigUint::from(7u32));

        indexer.invalidate_block(&b1.hash()).unwrap();
        assert_eq!(store.hash_db_state().unwrap(), before);
    }

    #[test]
    fn test_history_pages_newest_first() {
        let (_dir, store) = temp_store();
        let indexer = indexer(&store);
        let mut prev = genesis();
        indexer.index_block(&prev).unwrap();
        // heights 1..=4 each pay A twice, in separate txs
        for height in 1..=4u32 {
            let seed = u64::from(height) * 10;
            let next = block(
                u64::from(height),
                height,
                prev.hash(),
                vec![
                    tx(seed, &[], &[("A", 1)]),
                    tx(seed + 1, &[outpoint(seed, 0)], &[("A", 1)]),
                ],
            );
            indexer.index_block(&next).unwrap();
            prev = next;
        }

        let mut seen = Vec::new();
        let mut query = HistoryQuery {
            page_size: 3,
            ..Default::default()
        };
        loop {
            let page = store.address_history(&desc("A"), &query).unwrap();
            seen.extend(page.items.iter().map(|i| (i.height, i.txid, i.direction)));
            match page.next {
                Some(next) => query.cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen.len(), 8);
        assert_eq!(seen[0], (Some(4), txid(41), TxDirection::Both));
        assert_eq!(seen[1], (Some(4), txid(40), TxDirection::Output));
        assert_eq!(seen[7], (Some(1), txid(10), TxDirection::Output));
        assert!(seen.windows(2).all(|w| w[0].0 >= w[1].0));

        let bounded = store
            .address_history(
                &desc("A"),
                &HistoryQuery {
                    from_height: Some(2),
                    to_height: Some(3),
                    ..Default::default()
                },
            )
            .unwrap();
        let heights: Vec<_> = bounded.items.iter().map(|i| i.height).collect();
        assert_eq!(heights, vec![Some(3), Some(3), Some(2), Some(2)]);
        assert!(bounded.next.is_none());

        assert!(store
            .address_history(
                &desc("A"),
                &HistoryQuery {
                    cursor: Some("garbage".into()),
                    ..Default::default()
                }
            )
            .is_err());
    }

    #[test]
    fn test_cursor_survives_new_blocks() {
        let (_dir, store) = temp_store();
        let indexer = indexer(&store);
        let chain = s2_chain();
        for block in &chain {
            indexer.index_block(block).unwrap();
        }
        let query = HistoryQuery {
            page_size: 1,
            ..Default::default()
        };
        let first = store.address_history(&desc("A"), &query).unwrap();
        assert_eq!(first.items[0].txid, txid(201));

        let b3 = block(3, 3, chain[2].hash(), vec![tx(300, &[], &[("A", 1)])]);
        indexer.index_block(&b3).unwrap();

        let second = store
            .address_history(
                &desc("A"),
                &HistoryQuery {
                    cursor: first.next,
                    ..query
                },
            )
            .unwrap();
        assert_eq!(second.items[0].txid, txid(100));
        assert!(second.next.is_none());
    }

    #[test]
    fn test_assets_follow_connect_and_disconnect() {
        let (_dir, store) = temp_store();
        let definition = AssetDefinition {
            guid: 42,
            symbol: "TOK".into(),
            precision: 8,
            max_supply: 1_000_000,
            metadata: String::new(),
        };
        let indexer = BlockIndexer::new(
            Arc::clone(&store),
            Arc::new(TestParser::with_assets(vec![(txid(100), definition.clone())])),
            false,
        );
        let g = genesis();
        indexer.index_block(&g).unwrap();
        let before = store.hash_db_state().unwrap();

        let mint = with_asset(tx(100, &[], &[("A", 1)]), 0, 42, 500);
        let b1 = block(1, 1, g.hash(), vec![mint]);
        indexer.index_block(&b1).unwrap();
        let transfer = with_asset(tx(200, &[outpoint(100, 0)], &[("B", 1)]), 0, 42, 500);
        let b2 = block(
            2,
            2,
            b1.hash(),
            vec![tx(201, &[], &[("miner", 1)]), transfer],
        );
        indexer.index_block(&b2).unwrap();

        let asset = store.asset(42).unwrap().unwrap();
        assert_eq!(asset.definition, definition);
        assert_eq!(asset.created_height, 1);
        assert_eq!(asset.tx_count, 2);
        let a = balance(&store, "A").unwrap();
        assert_eq!(a.assets[&42].sent, BigUint::from(500u32));
        assert_eq!(a.assets[&42].balance, BigUint::default());
        assert_eq!(balance(&store, "B").unwrap().assets[&42].transfers, 1);
        assert_eq!(
            store.tx_assets.get(&(42, 2)).unwrap(),
            Some(vec![txid(200)])
        );

        indexer.invalidate_block(&b2.hash()).unwrap();
        assert_eq!(store.asset(42).unwrap().unwrap().tx_count, 1);
        indexer.invalidate_block(&b1.hash()).unwrap();
        assert!(store.asset(42).unwrap().is_none());
        assert_eq!(store.hash_db_state().unwrap(), before);
    }

    fn asset_definition(guid: u64, symbol: &str) -> AssetDefinition {
        AssetDefinition {
            guid,
            symbol: symbol.into(),
            precision: 8,
            max_supply: 1_000_000,
            metadata: String::new(),
        }
    }

    #[test]
    fn test_disconnect_keeps_assets_created_earlier() {
        let (_dir, store) = temp_store();
        let indexer = BlockIndexer::new(
            Arc::clone(&store),
            Arc::new(TestParser::with_assets(vec![
                (txid(100), asset_definition(7, "OLD")),
                (txid(201), asset_definition(42, "NEW")),
                (txid(202), asset_definition(43, "BARE")),
            ])),
            false,
        );
        let g = genesis();
        indexer.index_block(&g).unwrap();
        let b1 = block(1, 1, g.hash(), vec![with_asset(tx(100, &[], &[("A", 1)]), 0, 7, 10)]);
        indexer.index_block(&b1).unwrap();
        let after_b1 = store.hash_db_state().unwrap();

        let b2 = block(
            2,
            2,
            b1.hash(),
            vec![
                tx(200, &[], &[("miner", 1)]),
                with_asset(tx(201, &[outpoint(100, 0)], &[("B", 1)]), 0, 42, 5),
                // defines an asset but carries none of it
                tx(202, &[], &[("C", 1)]),
            ],
        );
        indexer.index_block(&b2).unwrap();
        assert_eq!(store.asset(42).unwrap().unwrap().created_height, 2);
        assert!(store.asset(43).unwrap().is_none());
        assert_eq!(store.asset(7).unwrap().unwrap().tx_count, 2);

        indexer.invalidate_block(&b2.hash()).unwrap();
        assert!(store.asset(42).unwrap().is_none());
        let old = store.asset(7).unwrap().unwrap();
        assert_eq!((old.created_height, old.tx_count), (1, 1));
        assert_eq!(store.hash_db_state().unwrap(), after_b1);
    }

    #[test]
    fn test_non_asset_coin_leaves_asset_columns_empty() {
        let (_dir, store) = temp_store();
        let indexer = indexer(&store);
        let g = genesis();
        indexer.index_block(&g).unwrap();
        let b1 = block(1, 1, g.hash(), vec![with_asset(tx(1, &[], &[("A", 1)]), 0, 7, 9)]);
        indexer.index_block(&b1).unwrap();

        assert_eq!(store.assets.list(None, SortOrder::Ascending).unwrap().count(), 0);
        assert_eq!(store.tx_assets.list(None, SortOrder::Ascending).unwrap().count(), 0);
        let a = balance(&store, "A").unwrap();
        assert!(a.assets.is_empty());
        assert_eq!(a.utxos[0].asset, None);
    }
}
