use std::fmt;

use chainbook_db::DBError;
use snafu::Snafu;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Block,
    Tx,
    BlockTxs,
    Ticker,
    Asset,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundKind::Block => write!(f, "block"),
            NotFoundKind::Tx => write!(f, "transaction"),
            NotFoundKind::BlockTxs => write!(f, "block transactions"),
            NotFoundKind::Ticker => write!(f, "fiat ticker"),
            NotFoundKind::Asset => write!(f, "asset"),
        }
    }
}

/// Coarse classification that decides how an error is handled: retried by the
/// follower, surfaced to the caller, or fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientBackend,
    NotFound,
    Parse,
    InvariantViolation,
    Config,
    Storage,
    Other,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(context(false))]
    DBError { source: DBError },

    #[snafu(context(false))]
    IOError { source: std::io::Error },

    #[snafu(display("Unable to read config {path}: {source}"))]
    ConfigRead {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Unable to parse config {path}: {source}"))]
    ConfigParse {
        path: String,
        source: serde_json::Error,
    },

    #[snafu(display("Invalid configuration: {msg}"))]
    Config { msg: String },

    #[snafu(display("Unable to find {kind}"))]
    NotFound { kind: NotFoundKind },

    #[snafu(display("Backend call {method} failed: {msg}"))]
    Backend { method: String, msg: String },

    #[snafu(display("Backend call {method} timed out after {secs}s"))]
    Timeout { method: String, secs: u64 },

    #[snafu(display("Backend rejected {method} ({code}): {msg}"))]
    BackendRejected {
        method: String,
        code: i32,
        msg: String,
    },

    #[snafu(display("Rate limited by {provider}"))]
    RateLimited { provider: String },

    #[snafu(display("HTTP request failed: {source}"))]
    Http { source: reqwest::Error },

    #[snafu(display("Malformed {what}: {reason}"))]
    Decode { what: &'static str, reason: String },

    #[snafu(display("Unable to parse block {hash}: {reason}"))]
    ParseBlock { hash: String, reason: String },

    #[snafu(display("Unable to parse transaction: {reason}"))]
    ParseTx { reason: String },

    #[snafu(display("Invalid address {address}: {reason}"))]
    InvalidAddress { address: String, reason: String },

    #[snafu(context(false))]
    SerdeJSONError { source: serde_json::Error },

    #[snafu(context(false))]
    FromHexError { source: hex::FromHexError },

    #[snafu(display("Block {hash} cannot be disconnected: its block txs are missing"))]
    DisconnectNotInvertible { hash: String },

    #[snafu(display("Block {hash} at height {height} does not extend the tip {tip}"))]
    PrevHashMismatch {
        height: u32,
        hash: String,
        tip: String,
    },

    #[snafu(display("No common ancestor within {max_depth} blocks of the tip"))]
    ReorgTooDeep { max_depth: u32 },

    #[snafu(display("Database was built for coin {found}, this instance runs {expected}"))]
    CoinMismatch { found: String, expected: String },

    #[snafu(display("Database is marked inconsistent, the index must be rebuilt"))]
    InconsistentState,

    #[snafu(display("Invariant violated: {msg}"))]
    Invariant { msg: String },

    #[snafu(display("Operation {op} is not supported"))]
    Unsupported { op: String },

    #[snafu(display("Shutdown requested"))]
    Shutdown,

    #[snafu(display("{msg}"))]
    Other { msg: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DBError { source } => match source {
                DBError::UnsupportedVersion { .. } => ErrorKind::InvariantViolation,
                DBError::ParseKey | DBError::WrongKeyLength | DBError::ParseValue(_) => {
                    ErrorKind::Parse
                }
                _ => ErrorKind::Storage,
            },
            Error::IOError { .. } => ErrorKind::Storage,
            Error::ConfigRead { .. } | Error::ConfigParse { .. } | Error::Config { .. } => {
                ErrorKind::Config
            }
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Backend { .. }
            | Error::Timeout { .. }
            | Error::RateLimited { .. }
            | Error::Http { .. } => ErrorKind::TransientBackend,
            Error::Decode { .. }
            | Error::ParseBlock { .. }
            | Error::ParseTx { .. }
            | Error::InvalidAddress { .. }
            | Error::SerdeJSONError { .. }
            | Error::FromHexError { .. } => ErrorKind::Parse,
            Error::DisconnectNotInvertible { .. }
            | Error::PrevHashMismatch { .. }
            | Error::ReorgTooDeep { .. }
            | Error::CoinMismatch { .. }
            | Error::InconsistentState
            | Error::Invariant { .. } => ErrorKind::InvariantViolation,
            Error::BackendRejected { .. }
            | Error::Unsupported { .. }
            | Error::Shutdown
            | Error::Other { .. } => ErrorKind::Other,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientBackend
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Process exit code for an error that terminates the binary.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Config => 2,
            ErrorKind::InvariantViolation => 3,
            ErrorKind::Storage => 4,
            ErrorKind::Parse => 5,
            _ => 1,
        }
    }
}

impl From<Error> for DBError {
    fn from(e: Error) -> Self {
        DBError::ParseValue(e.to_string())
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other { msg: s.to_string() }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other { msg }
    }
}
