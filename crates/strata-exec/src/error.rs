use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    /// The contract is malformed or references impossible state
    #[error("Contract validation failed: {0}")]
    ContractValidate(String),

    /// The contract failed while executing
    #[error("Contract execution failed: {0}")]
    ContractExe(String),

    /// Sender cannot cover the transfer amount plus fee
    #[error("Insufficient resource: have {have}, need {need}")]
    InsufficientResource { have: u64, need: u64 },

    /// Commit handles were undone out of LIFO order. The caller has lost
    /// track of its own apply sequence; processing must stop.
    #[error("Undo out of order: expected sequence {expected}, got {got}")]
    UndoOrder { expected: u64, got: u64 },
}
