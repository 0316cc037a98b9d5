pub mod chain;
pub mod codec;
pub mod config;
pub mod error;
pub mod fiat;
pub mod indexer;
pub mod mempool;
pub mod model;
pub mod query;
pub mod storage;
pub mod sync;
#[cfg(test)]
pub(crate) mod testing;

pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;
