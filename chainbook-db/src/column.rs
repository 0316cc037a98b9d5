use std::{fmt::Debug, marker::PhantomData, sync::Arc};

use rocksdb::{ColumnFamily, Direction, IteratorMode, WriteBatch};
use serde::{de::DeserializeOwned, Serialize};

use crate::{Result, Rocks, Snapshot};

/// Column family a type is stored under.
pub trait ColumnName {
    const NAME: &'static str;
}

/// Key grammar of a column. Keys default to bincode; columns that are
/// scanned in order override both directions with a byte-sortable form.
pub trait Column {
    type Index: Debug + Serialize + DeserializeOwned;

    fn key(index: &Self::Index) -> Result<Vec<u8>> {
        Ok(bincode::serialize(index)?)
    }

    fn get_key(raw_key: Box<[u8]>) -> Result<Self::Index> {
        Ok(bincode::deserialize(&raw_key)?)
    }
}

/// Value grammar of a column, bincode unless overridden.
pub trait TypedColumn: Column {
    type Type: Serialize + DeserializeOwned + Debug;

    fn encode(value: &Self::Type) -> Result<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn decode(raw: &[u8]) -> Result<Self::Type> {
        Ok(bincode::deserialize(raw)?)
    }
}

/// Typed handle on one column family of a shared [`Rocks`].
#[derive(Debug, Clone)]
pub struct LedgerColumn<C>
where
    C: Column + ColumnName,
{
    pub backend: Arc<Rocks>,
    pub column: PhantomData<C>,
}

type Entry = std::result::Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>;

fn decode_entry<C: TypedColumn>(entry: Entry) -> Result<(C::Index, C::Type)> {
    let (key, value) = entry?;
    Ok((C::get_key(key)?, C::decode(&value)?))
}

fn start_mode(seek: Option<&[u8]>, direction: Direction) -> IteratorMode<'_> {
    match (seek, direction) {
        (Some(key), direction) => IteratorMode::From(key, direction),
        (None, Direction::Forward) => IteratorMode::Start,
        (None, Direction::Reverse) => IteratorMode::End,
    }
}

impl<C> LedgerColumn<C>
where
    C: Column + ColumnName,
{
    pub fn handle(&self) -> Result<&ColumnFamily> {
        self.backend.cf_handle(C::NAME)
    }

    pub fn delete(&self, key: &C::Index) -> Result<()> {
        Ok(self.backend.db().delete_cf(self.handle()?, C::key(key)?)?)
    }

    pub fn batch_delete(&self, batch: &mut WriteBatch, key: &C::Index) -> Result<()> {
        batch.delete_cf(self.handle()?, C::key(key)?);
        Ok(())
    }

    fn seek_key(&self, from: Option<&C::Index>) -> Result<Option<Vec<u8>>> {
        from.map(C::key).transpose()
    }
}

impl<C> LedgerColumn<C>
where
    C: TypedColumn + ColumnName,
{
    pub fn get(&self, key: &C::Index) -> Result<Option<C::Type>> {
        match self.backend.db().get_cf(self.handle()?, C::key(key)?)? {
            Some(raw) => Ok(Some(C::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &C::Index, value: &C::Type) -> Result<()> {
        let (key, value) = (C::key(key)?, C::encode(value)?);
        Ok(self.backend.db().put_cf(self.handle()?, key, value)?)
    }

    pub fn batch_put(&self, batch: &mut WriteBatch, key: &C::Index, value: &C::Type) -> Result<()> {
        batch.put_cf(self.handle()?, C::key(key)?, C::encode(value)?);
        Ok(())
    }

    /// Reads `key` as of `snapshot`.
    pub fn get_at(&self, snapshot: &Snapshot<'_>, key: &C::Index) -> Result<Option<C::Type>> {
        match snapshot.get_cf(self.handle()?, C::key(key)?)? {
            Some(raw) => Ok(Some(C::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Every row from `from` (inclusive) onwards in `direction`, or from
    /// the matching end of the column when `from` is `None`.
    pub fn iter(
        &self,
        from: Option<C::Index>,
        direction: Direction,
    ) -> Result<impl Iterator<Item = Result<(C::Index, C::Type)>> + '_> {
        let seek = self.seek_key(from.as_ref())?;
        let rows = self
            .backend
            .db()
            .iterator_cf(self.handle()?, start_mode(seek.as_deref(), direction));
        Ok(rows.map(decode_entry::<C>))
    }

    pub fn iter_at<'a>(
        &'a self,
        snapshot: &'a Snapshot<'a>,
        from: Option<C::Index>,
        direction: Direction,
    ) -> Result<impl Iterator<Item = Result<(C::Index, C::Type)>> + 'a> {
        let seek = self.seek_key(from.as_ref())?;
        let rows = snapshot.iterator_cf(self.handle()?, start_mode(seek.as_deref(), direction));
        Ok(rows.map(decode_entry::<C>))
    }

    /// Forward scan over the raw keys that start with `prefix`, beginning at
    /// `start` (which must itself start with `prefix`) or at the prefix itself.
    pub fn prefix_iter_at<'a>(
        &'a self,
        snapshot: &'a Snapshot<'a>,
        prefix: Vec<u8>,
        start: Option<Vec<u8>>,
    ) -> Result<impl Iterator<Item = Result<(C::Index, C::Type)>> + 'a> {
        let seek = start.unwrap_or_else(|| prefix.clone());
        let mode = IteratorMode::From(&seek, Direction::Forward);
        let rows = snapshot.iterator_cf(self.handle()?, mode);
        Ok(rows
            .take_while(move |entry| {
                entry
                    .as_ref()
                    .map_or(true, |(key, _)| key.starts_with(&prefix))
            })
            .map(decode_entry::<C>))
    }
}
