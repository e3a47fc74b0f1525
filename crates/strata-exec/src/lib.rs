//! Strata Exec - the execution collaborator of the consensus core
//!
//! The chain manager treats execution as an opaque engine: applying a block
//! yields a commit handle, and handles can be undone in strict LIFO order
//! to roll the state back across a fork switch. `LedgerEngine` is the
//! built-in balance-ledger implementation.

pub mod error;
pub mod ledger;

pub use error::ExecError;
pub use ledger::{CommitHandle, ExecutionEngine, LedgerEngine};
