//! Strata Consensus - fork choice, leader election, and upgrade voting
//!
//! The consensus core of the Strata DPoS chain: `ForkTree` indexes every
//! block not yet irreversible, `WitnessSchedule` maps time slots to
//! witnesses, `ForkVersionTracker` detects network-wide protocol upgrades,
//! and `ChainManager` orchestrates validation, the fast-append path, and
//! the fork-switch protocol.

pub mod config;
pub mod error;
pub mod fork_tracker;
pub mod fork_tree;
pub mod manager;
pub mod schedule;

pub use config::ChainConfig;
pub use error::ConsensusError;
pub use fork_tracker::ForkVersionTracker;
pub use fork_tree::ForkTree;
pub use manager::ChainManager;
pub use schedule::WitnessSchedule;
