use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Header not found")]
    HeaderNotFound,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Durable state violates an invariant (e.g. the irreversible point
    /// moved backwards). Block processing must stop.
    #[error("Store corrupted: {0}")]
    Corrupted(String),

    #[error("Core error: {0}")]
    Core(#[from] strata_core::CoreError),
}
