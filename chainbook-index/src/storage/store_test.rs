#[cfg(test)]
mod tests {
    use chainbook_db::WriteBatch;
    use tempfile::tempdir;

    use crate::{
        error::{Error, ErrorKind},
        model::{DbState, FiatTicker, Hash256, HeightInfo},
        storage::{RepositoryOps, SortOrder, Store, INTERNAL_STATE_KEY, SCHEMA_VERSION},
    };

    #[test]
    fn test_fresh_store_is_stamped() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "Bitcoin", 0, 8).unwrap();
        let state = store.internal_state();
        assert_eq!(state.coin, "Bitcoin");
        assert_eq!(state.schema_version, SCHEMA_VERSION);
        assert_eq!(state.db_state, DbState::Open);
        assert_eq!(store.best_block(), None);
    }

    #[test]
    fn test_close_and_reopen_keeps_cursor() {
        let dir = tempdir().unwrap();
        let hash = Hash256([3; 32]);
        {
            let store = Store::open(dir.path(), "Bitcoin", 0, 8).unwrap();
            let mut state = store.internal_state();
            state.best_height = Some(0);
            state.best_hash = Some(hash);
            store.commit(WriteBatch::default(), state).unwrap();
            store.close().unwrap();
        }
        let store = Store::open(dir.path(), "Bitcoin", 0, 8).unwrap();
        assert_eq!(store.best_block(), Some((0, hash)));
        assert_eq!(store.internal_state().db_state, DbState::Open);
    }

    #[test]
    fn test_other_coin_is_rejected() {
        let dir = tempdir().unwrap();
        Store::open(dir.path(), "Bitcoin", 0, 8)
            .unwrap()
            .close()
            .unwrap();
        let err = Store::open(dir.path(), "Litecoin", 0, 8).unwrap_err();
        assert!(matches!(err, Error::CoinMismatch { .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_other_schema_version_is_rejected() {
        let dir = tempdir().unwrap();
        {
            let store = Store::open(dir.path(), "Bitcoin", 0, 8).unwrap();
            let mut state = store.internal_state();
            state.schema_version = SCHEMA_VERSION + 1;
            store
                .internal_state
                .put(&INTERNAL_STATE_KEY.to_string(), &state)
                .unwrap();
        }
        let err = Store::open(dir.path(), "Bitcoin", 0, 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    }

    #[test]
    fn test_inconsistent_store_is_rejected() {
        let dir = tempdir().unwrap();
        Store::open(dir.path(), "Bitcoin", 0, 8)
            .unwrap()
            .mark_inconsistent()
            .unwrap();
        let err = Store::open(dir.path(), "Bitcoin", 0, 8).unwrap_err();
        assert!(matches!(err, Error::InconsistentState));
    }

    #[test]
    fn test_heights_list_in_chain_order() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "Bitcoin", 0, 8).unwrap();
        for height in [2u32, 0, 1, 300] {
            let info = HeightInfo {
                hash: Hash256([height as u8; 32]),
                time: i64::from(height),
                tx_count: 1,
                size: 100,
            };
            store.height.put(&height, &info).unwrap();
        }
        let heights = store
            .height
            .list(None, SortOrder::Ascending)
            .unwrap()
            .map(|item| item.map(|(h, _)| h))
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(heights, vec![0, 1, 2, 300]);
        assert_eq!(store.block_hash(300).unwrap(), Some(Hash256([44; 32])));
    }

    #[test]
    fn test_ticker_rows_carry_key_timestamp() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path(), "Bitcoin", 0, 8).unwrap();
        let mut batch = WriteBatch::default();
        for timestamp in [1_700_000_000i64, 1_700_086_400] {
            let ticker = FiatTicker {
                timestamp,
                rates: [("usd".to_string(), 1.5f32)].into_iter().collect(),
                token_rates: Default::default(),
            };
            store.fiat_rates.batch_put(&mut batch, &ticker).unwrap();
        }
        store.write(batch).unwrap();

        let snapshot = store.snapshot();
        let last = store
            .fiat_rates
            .list_at(&snapshot, None, SortOrder::Descending)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(last.timestamp, 1_700_086_400);
        assert_eq!(
            store
                .fiat_rates
                .get_at(&snapshot, 1_700_000_000)
                .unwrap()
                .unwrap()
                .rates["usd"],
            1.5
        );
    }
}
