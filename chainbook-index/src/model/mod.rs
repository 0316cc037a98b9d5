mod address;
mod asset;
mod block;
mod hash;
mod internal_state;
mod ticker;
mod tx;
mod tx_addresses;

pub use address::*;
pub use asset::*;
pub use block::*;
pub use hash::*;
pub use internal_state::*;
pub use ticker::*;
pub use tx::*;
pub use tx_addresses::*;
