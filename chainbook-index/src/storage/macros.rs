/// Declares a column family together with its repository: the struct is both
/// the column marker (`ColumnName`, `Column`, `TypedColumn`) and the typed
/// handle the rest of the crate reads and writes through.
#[macro_export]
macro_rules! define_table {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            name = $cf_name:expr,
            key_type = $key_type:ty,
            value_type = $value_type:ty,
            $(custom_key = { $($custom_key:tt)* },)?
            $(custom_value = { $($custom_value:tt)* },)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug)]
        $vis struct $name {
            col: LedgerColumn<$name>,
        }

        impl ColumnName for $name {
            const NAME: &'static str = $cf_name;
        }

        impl Column for $name {
            type Index = $key_type;

            $(
                $($custom_key)*
            )?
        }

        impl TypedColumn for $name {
            type Type = $value_type;

            $(
                $($custom_value)*
            )?
        }

        impl $name {
            pub fn new(store: &IndexStore) -> Self {
                Self {
                    col: store.column(),
                }
            }

            #[allow(unused)]
            pub fn get_at(&self, snapshot: &Snapshot<'_>, id: &$key_type) -> Result<Option<$value_type>> {
                Ok(self.col.get_at(snapshot, id)?)
            }

            /// Rows whose raw key starts with `prefix`, from `start` onwards.
            #[allow(unused)]
            pub fn prefix_iter_at<'a>(
                &'a self,
                snapshot: &'a Snapshot<'a>,
                prefix: Vec<u8>,
                start: Option<Vec<u8>>,
            ) -> Result<impl Iterator<Item = Result<($key_type, $value_type)>> + 'a> {
                Ok(self
                    .col
                    .prefix_iter_at(snapshot, prefix, start)?
                    .map(|item| item.map_err(Into::into)))
            }

            #[allow(unused)]
            pub fn batch_put(&self, batch: &mut WriteBatch, id: &$key_type, item: &$value_type) -> Result<()> {
                Ok(self.col.batch_put(batch, id, item)?)
            }

            #[allow(unused)]
            pub fn batch_delete(&self, batch: &mut WriteBatch, id: &$key_type) -> Result<()> {
                Ok(self.col.batch_delete(batch, id)?)
            }
        }

        impl RepositoryOps<$key_type, $value_type> for $name {
            type ListItem = std::result::Result<($key_type, $value_type), chainbook_db::DBError>;

            fn get(&self, id: &$key_type) -> Result<Option<$value_type>> {
                Ok(self.col.get(id)?)
            }

            fn put(&self, id: &$key_type, item: &$value_type) -> Result<()> {
                Ok(self.col.put(id, item)?)
            }

            fn delete(&self, id: &$key_type) -> Result<()> {
                Ok(self.col.delete(id)?)
            }

            fn list<'a>(&'a self, from: Option<$key_type>, dir: $crate::storage::SortOrder) -> Result<Box<dyn Iterator<Item = Self::ListItem> + 'a>> {
                let it = self.col.iter(from, dir.into())?;
                Ok(Box::new(it))
            }
        }
    };
}
