mod columns;
mod fiat;
mod history;
mod macros;
mod store;
mod store_test;

use chainbook_db::Direction;
pub use columns::*;
pub use history::HistoryQuery;
pub use store::*;

use crate::Result;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl From<SortOrder> for Direction {
    fn from(sort_order: SortOrder) -> Self {
        match sort_order {
            SortOrder::Ascending => Direction::Forward,
            SortOrder::Descending => Direction::Reverse,
        }
    }
}

pub trait RepositoryOps<K, V> {
    type ListItem;
    fn get(&self, key: &K) -> Result<Option<V>>;
    fn put(&self, key: &K, value: &V) -> Result<()>;
    fn delete(&self, key: &K) -> Result<()>;
    fn list<'a>(
        &'a self,
        from: Option<K>,
        direction: SortOrder,
    ) -> Result<Box<dyn Iterator<Item = Self::ListItem> + 'a>>;
}
