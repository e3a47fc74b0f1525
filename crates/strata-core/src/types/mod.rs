pub mod block;
pub mod transaction;

pub use block::{BlockHeader, BlockRecord, GenesisConfig};
pub use transaction::{Contract, Transaction};
