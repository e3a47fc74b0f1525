use strata_exec::ExecError;
use thiserror::Error;

/// Validation verdicts and faults of the consensus core. Every verdict is
/// definitive: retrying the same block or transaction cannot succeed.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Bad block: {0}")]
    BadBlock(String),

    #[error("Bad block number: {0}")]
    BadNumberBlock(String),

    #[error("Transaction too big: {0}")]
    TooBigTransaction(String),

    #[error("Unlinked block: parent unknown")]
    UnLinkedBlock,

    #[error("No common ancestor within the fork depth bound")]
    NonCommonBlock,

    #[error("Header not found")]
    HeaderNotFound,

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Schedule validation failed: {0}")]
    ValidateSchedule(String),

    #[error("Stale chain reference: {0}")]
    Tapos(String),

    #[error("Duplicate transaction: {0}")]
    DupTransaction(String),

    #[error("Transaction expiration: {0}")]
    TransactionExpiration(String),

    #[error("Signature validation failed: {0}")]
    ValidateSignature(String),

    #[error("Account resource insufficient: {0}")]
    AccountResourceInsufficient(String),

    #[error("Contract validation failed: {0}")]
    ContractValidate(String),

    #[error("Contract execution failed: {0}")]
    ContractExe(String),

    /// Policy gate: the transaction's contract type requires a hard fork
    /// the network has not unanimously adopted yet
    #[error("not yet hard forked")]
    NotYetHardForked,

    /// Unrecoverable inconsistency; block processing must stop
    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Store error: {0}")]
    Store(#[from] strata_store::StoreError),

    #[error("Core error: {0}")]
    Core(#[from] strata_core::CoreError),
}

impl From<ExecError> for ConsensusError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::ContractValidate(msg) => ConsensusError::ContractValidate(msg),
            ExecError::ContractExe(msg) => ConsensusError::ContractExe(msg),
            ExecError::InsufficientResource { have, need } => {
                ConsensusError::AccountResourceInsufficient(format!(
                    "have {}, need {}",
                    have, need
                ))
            }
            ExecError::UndoOrder { .. } => ConsensusError::Fatal(e.to_string()),
        }
    }
}

impl ConsensusError {
    /// Whether this error means the node must stop processing blocks
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConsensusError::Fatal(_)
                | ConsensusError::Store(strata_store::StoreError::Corrupted(_))
        )
    }
}
