use strata_core::constants::{
    CLOCK_SKEW_MS, CURRENT_VERSION, LEGACY_CONTRACT_SCOPE, MAX_BLOCK_SIZE, MAX_FORK_DEPTH,
    MAX_TRANSACTION_EXPIRATION_MS, MAX_TRANSACTION_SIZE, SOLIDIFIED_THRESHOLD, TAPOS_WINDOW,
};
use strata_core::GenesisConfig;

/// Explicit configuration for the consensus core, constructed once at
/// startup and passed into `ChainManager` construction. There is no
/// ambient global state.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub genesis: GenesisConfig,
    /// Protocol version this node declares in blocks it produces, and the
    /// version the upgrade vote must unanimously reach
    pub version: u32,
    pub max_block_size: usize,
    pub max_transaction_size: usize,
    /// How far a block timestamp may run ahead of local time
    pub clock_skew_ms: i64,
    /// Recent-block window for Tapos references and the duplicate check
    pub tapos_window: u64,
    pub max_transaction_expiration_ms: i64,
    pub max_fork_depth: usize,
    /// Percentage of witnesses that must build on a block to solidify it
    pub solidified_threshold: u64,
    /// Highest contract ordinal executable before the hard fork
    pub legacy_contract_scope: u32,
    pub maintenance_interval_ms: i64,
}

impl ChainConfig {
    /// Protocol defaults around a given genesis
    pub fn new(genesis: GenesisConfig) -> Self {
        ChainConfig {
            genesis,
            version: CURRENT_VERSION,
            max_block_size: MAX_BLOCK_SIZE,
            max_transaction_size: MAX_TRANSACTION_SIZE,
            clock_skew_ms: CLOCK_SKEW_MS,
            tapos_window: TAPOS_WINDOW,
            max_transaction_expiration_ms: MAX_TRANSACTION_EXPIRATION_MS,
            max_fork_depth: MAX_FORK_DEPTH,
            solidified_threshold: SOLIDIFIED_THRESHOLD,
            legacy_contract_scope: LEGACY_CONTRACT_SCOPE,
            maintenance_interval_ms: 6 * 60 * 60 * 1_000,
        }
    }
}
