use crate::{DBError, Result};

/// Schema versioning for a store built on [`crate::Rocks`].
///
/// `CURRENT_VERSION` is bumped whenever the key or value grammar of any column
/// changes. Data written under another version cannot be read safely, so there
/// is no in-place migration: `startup` stamps an empty database and rejects one
/// written under a different version.
pub trait DBVersionControl {
    const CURRENT_VERSION: u32;

    /// Stamps the database with `version`. Must be durable once it returns.
    fn set_version(&self, version: u32) -> Result<()>;

    /// Version stored in the database, `None` for a database never stamped.
    fn get_version(&self) -> Result<Option<u32>>;

    /// Startup check, called once right after the database is opened.
    fn startup(&self) -> Result<()> {
        match self.get_version()? {
            None => self.set_version(Self::CURRENT_VERSION),
            Some(found) if found == Self::CURRENT_VERSION => Ok(()),
            Some(found) => Err(DBError::UnsupportedVersion {
                found,
                expected: Self::CURRENT_VERSION,
            }),
        }
    }
}
