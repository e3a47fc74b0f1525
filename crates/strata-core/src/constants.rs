//! Chain-wide protocol constants.

/// Protocol version this node was built for. A hard fork activates once
/// every active witness has produced a block declaring this version.
pub const CURRENT_VERSION: u32 = 7;

/// Target spacing between blocks, in milliseconds. One slot per interval.
pub const BLOCK_INTERVAL_MS: i64 = 3_000;

/// Upper bound on the encoded size of a block.
pub const MAX_BLOCK_SIZE: usize = 2_000_000;

/// Upper bound on the encoded size of a single transaction.
pub const MAX_TRANSACTION_SIZE: usize = 500_000;

/// How far a block timestamp may run ahead of local time before the block
/// is rejected as structurally invalid.
pub const CLOCK_SKEW_MS: i64 = BLOCK_INTERVAL_MS;

/// Number of recent blocks a transaction may use as its Tapos reference.
/// References older than this window are stale.
pub const TAPOS_WINDOW: u64 = 256;

/// Maximum distance a transaction expiration may lie past the block time.
pub const MAX_TRANSACTION_EXPIRATION_MS: i64 = 24 * 60 * 60 * 1_000;

/// Maximum depth a competing branch may reach back when searching for a
/// common ancestor during a fork switch.
pub const MAX_FORK_DEPTH: usize = 256;

/// Percentage of witnesses that must have built on a block before it is
/// considered irreversible.
pub const SOLIDIFIED_THRESHOLD: u64 = 70;

/// Contract ordinals at or below this value predate the hard fork and are
/// always executable. Ordinals above it require network-wide upgrade
/// consensus first.
pub const LEGACY_CONTRACT_SCOPE: u32 = 9;
