mod backend;
mod bitcoin;
mod bitcoind;
mod network;
mod notify;
mod parser;
mod registry;

pub use backend::{BackendFeatures, ChainBackend, ChainInfo, Notification};
pub use bitcoind::BitcoindBackend;
pub use network::Network;
pub use notify::{parse_notification, run_notify_listener};
pub use parser::ChainParser;
pub use registry::{BackendCtor, CoinRegistry, ParserCtor};

pub use self::bitcoin::{BitcoinParser, NULL_DATA_TAG};
