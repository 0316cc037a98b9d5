use std::fmt;

#[derive(Debug)]
pub enum DBError {
    Rocks(rocksdb::Error),
    Bincode(bincode::Error),
    /// Raw key bytes do not decode to the column's index type.
    ParseKey,
    WrongKeyLength,
    ParseValue(String),
    Custom(anyhow::Error),
    UnsupportedVersion { found: u32, expected: u32 },
}

impl fmt::Display for DBError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rocks(e) => write!(f, "rocksdb: {e}"),
            Self::Bincode(e) => write!(f, "bincode: {e}"),
            Self::ParseKey => f.write_str("malformed column key"),
            Self::WrongKeyLength => f.write_str("column key has an unexpected length"),
            Self::ParseValue(msg) => write!(f, "malformed column value: {msg}"),
            Self::Custom(e) => write!(f, "{e:#}"),
            Self::UnsupportedVersion { found, expected } => write!(
                f,
                "index schema version is {found}, this build reads {expected}; rebuild the index"
            ),
        }
    }
}

impl std::error::Error for DBError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rocks(e) => Some(e),
            Self::Bincode(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<rocksdb::Error> for DBError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Rocks(e)
    }
}

impl From<bincode::Error> for DBError {
    fn from(e: bincode::Error) -> Self {
        Self::Bincode(e)
    }
}

impl From<anyhow::Error> for DBError {
    fn from(e: anyhow::Error) -> Self {
        Self::Custom(e)
    }
}
