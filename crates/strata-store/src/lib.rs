//! Strata Store - the durable layer of the consensus core
//!
//! Provides the byte-keyed `Storage` abstraction with per-block atomic
//! commits, and `ChainStore`: the append-only canonical ledger plus the
//! dynamic properties (head pointers, solidified point, fork flag,
//! version slots, maintenance schedule).

pub mod chain_store;
pub mod error;
pub mod storage;

pub use chain_store::ChainStore;
pub use error::StoreError;
pub use storage::{FileStorage, MemoryStorage, Storage};
