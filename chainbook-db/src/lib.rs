//! RocksDB with one typed handle per column family.

mod column;
mod error;
mod options;
pub mod version;

use std::path::Path;

use anyhow::anyhow;
use log::{debug, info};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, SnapshotWithThreadMode, DB};
use sha2::{Digest, Sha256};

pub use column::{Column, ColumnName, LedgerColumn, TypedColumn};
pub use error::DBError;
pub use options::{get_cf_scan_options, get_db_default_options};
pub use rocksdb::{Direction, Options, WriteBatch};

pub type Result<T> = std::result::Result<T, DBError>;

/// Point-in-time read view of the whole database.
pub type Snapshot<'a> = SnapshotWithThreadMode<'a, DB>;

const MIB: f64 = (1 << 20) as f64;

#[derive(Debug)]
pub struct Rocks(DB);

/// Size estimates of one column family.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TableSize {
    pub bytes: u64,
    pub keys: u64,
}

impl TableSize {
    fn avg_entry(&self) -> f64 {
        match self.keys {
            0 => 0.0,
            keys => self.bytes as f64 / keys as f64,
        }
    }
}

impl Rocks {
    /// Opens the database at `path` with every column family of `families`,
    /// creating whatever is missing.
    pub fn open(
        path: &Path,
        families: &[(&'static str, Option<Options>)],
        opts: Option<Options>,
    ) -> Result<Self> {
        let descriptors = families.iter().map(|(name, cf_opts)| {
            ColumnFamilyDescriptor::new(*name, cf_opts.clone().unwrap_or_default())
        });
        let opts = opts.unwrap_or_else(|| get_db_default_options(64));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;
        debug!(
            "opened rocksdb at {} with {} column families",
            path.display(),
            families.len()
        );
        Ok(Self(db))
    }

    pub(crate) fn db(&self) -> &DB {
        &self.0
    }

    pub fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.0
            .cf_handle(name)
            .ok_or_else(|| anyhow!("column family {name} is not open").into())
    }

    pub fn snapshot(&self) -> Snapshot<'_> {
        self.0.snapshot()
    }

    /// Applies every put and delete of `batch` atomically.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        Ok(self.0.write(batch)?)
    }

    pub fn flush(&self) -> Result<()> {
        Ok(self.0.flush()?)
    }

    pub fn table_size(&self, name: &str) -> Result<TableSize> {
        let cf = self.cf_handle(name)?;
        let property = |key: &str| -> Result<u64> {
            Ok(self.0.property_int_value_cf(cf, key)?.unwrap_or_default())
        };
        Ok(TableSize {
            bytes: property("rocksdb.estimate-live-data-size")?,
            keys: property("rocksdb.estimate-num-keys")?,
        })
    }

    /// Logs the estimated size of each of `names` and their share of the total.
    pub fn dump_table_sizes(&self, names: &[&'static str]) -> Result<()> {
        let sizes = names
            .iter()
            .map(|name| Ok((*name, self.table_size(name)?)))
            .collect::<Result<Vec<_>>>()?;
        let total = sizes
            .iter()
            .fold(TableSize::default(), |acc, (_, size)| TableSize {
                bytes: acc.bytes + size.bytes,
                keys: acc.keys + size.keys,
            });

        info!(
            "{:<20} {:>12} {:>14} {:>10} {:>7}",
            "column", "MiB", "keys", "avg B", "share"
        );
        for (name, size) in &sizes {
            let share = match total.bytes {
                0 => 0.0,
                all => 100.0 * size.bytes as f64 / all as f64,
            };
            info!(
                "{name:<20} {:>12.2} {:>14} {:>10.1} {share:>6.1}%",
                size.bytes as f64 / MIB,
                size.keys,
                size.avg_entry()
            );
        }
        info!(
            "{:<20} {:>12.2} {:>14} {:>10.1}",
            "total",
            total.bytes as f64 / MIB,
            total.keys,
            total.avg_entry()
        );
        Ok(())
    }

    /// Hex sha256 over every row of `names`, column by column in key order,
    /// each key and value length prefixed. Equal contents hash equally.
    pub fn hash_db_state(&self, names: &[&'static str]) -> Result<String> {
        let mut digest = Sha256::new();
        for name in names {
            digest.update(name.as_bytes());
            let mut rows = 0u64;
            for entry in self.0.iterator_cf(self.cf_handle(name)?, IteratorMode::Start) {
                let (key, value) = entry?;
                for part in [&key, &value] {
                    digest.update((part.len() as u32).to_be_bytes());
                    digest.update(part);
                }
                rows += 1;
            }
            debug!("state hash covered {rows} rows of {name}");
        }
        Ok(hex::encode(digest.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use std::{marker::PhantomData, sync::Arc};

    use tempfile::tempdir;

    use super::*;

    #[derive(Debug)]
    struct Heights;

    impl ColumnName for Heights {
        const NAME: &'static str = "heights";
    }

    impl Column for Heights {
        type Index = u32;

        fn key(index: &Self::Index) -> Result<Vec<u8>> {
            Ok(index.to_be_bytes().to_vec())
        }

        fn get_key(raw_key: Box<[u8]>) -> Result<Self::Index> {
            let bytes: [u8; 4] = raw_key
                .as_ref()
                .try_into()
                .map_err(|_| DBError::WrongKeyLength)?;
            Ok(u32::from_be_bytes(bytes))
        }
    }

    impl TypedColumn for Heights {
        type Type = String;
    }

    fn open(path: &Path) -> Arc<Rocks> {
        Arc::new(Rocks::open(path, &[(Heights::NAME, None)], None).expect("open"))
    }

    fn column(rocks: &Arc<Rocks>) -> LedgerColumn<Heights> {
        LedgerColumn {
            backend: Arc::clone(rocks),
            column: PhantomData,
        }
    }

    #[test]
    fn test_batch_is_applied_atomically() {
        let dir = tempdir().unwrap();
        let rocks = open(dir.path());
        let col = column(&rocks);

        let mut batch = WriteBatch::default();
        col.batch_put(&mut batch, &1, &"one".to_string()).unwrap();
        col.batch_put(&mut batch, &2, &"two".to_string()).unwrap();
        assert_eq!(col.get(&1).unwrap(), None);

        rocks.write(batch).unwrap();
        assert_eq!(col.get(&1).unwrap(), Some("one".to_string()));
        assert_eq!(col.get(&2).unwrap(), Some("two".to_string()));
    }

    #[test]
    fn test_snapshot_ignores_later_writes() {
        let dir = tempdir().unwrap();
        let rocks = open(dir.path());
        let col = column(&rocks);
        col.put(&7, &"before".to_string()).unwrap();

        let snapshot = rocks.snapshot();
        col.put(&7, &"after".to_string()).unwrap();
        col.put(&8, &"new".to_string()).unwrap();

        assert_eq!(col.get_at(&snapshot, &7).unwrap(), Some("before".to_string()));
        assert_eq!(col.get_at(&snapshot, &8).unwrap(), None);
        let seen = col
            .iter_at(&snapshot, None, Direction::Forward)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(seen, vec![(7, "before".to_string())]);
    }

    #[test]
    fn test_reverse_iteration_from_key() {
        let dir = tempdir().unwrap();
        let rocks = open(dir.path());
        let col = column(&rocks);
        for h in [1u32, 2, 3, 256] {
            col.put(&h, &h.to_string()).unwrap();
        }

        let keys = col
            .iter(Some(255), Direction::Reverse)
            .unwrap()
            .map(|r| r.map(|(k, _)| k))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(keys, vec![3, 2, 1]);
    }

    #[test]
    fn test_prefix_scan_stops_at_prefix_end() {
        let dir = tempdir().unwrap();
        let rocks = open(dir.path());
        let col = column(&rocks);
        for h in [0x0100u32, 0x0101, 0x01ff, 0x0200] {
            col.put(&h, &h.to_string()).unwrap();
        }

        let snapshot = rocks.snapshot();
        let keys = col
            .prefix_iter_at(&snapshot, vec![0, 0, 1], Some(vec![0, 0, 1, 1]))
            .unwrap()
            .map(|r| r.map(|(k, _)| k))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(keys, vec![0x0101, 0x01ff]);
    }

    #[test]
    fn test_hash_db_state_tracks_contents() {
        let dir = tempdir().unwrap();
        let rocks = open(dir.path());
        let col = column(&rocks);

        let empty = rocks.hash_db_state(&[Heights::NAME]).unwrap();
        col.put(&1, &"x".to_string()).unwrap();
        let one = rocks.hash_db_state(&[Heights::NAME]).unwrap();
        assert_ne!(empty, one);

        col.delete(&1).unwrap();
        assert_eq!(rocks.hash_db_state(&[Heights::NAME]).unwrap(), empty);
    }

    #[test]
    fn test_unknown_column_is_an_error() {
        let dir = tempdir().unwrap();
        let rocks = open(dir.path());
        assert!(matches!(rocks.cf_handle("missing"), Err(DBError::Custom(_))));
        assert_eq!(rocks.table_size(Heights::NAME).unwrap().keys, 0);
    }
}
