use strata_core::PublicKey;
use tracing::debug;

use crate::error::ConsensusError;

/// Deterministic round-robin leader election.
///
/// Time is divided into fixed slots from the genesis timestamp; the
/// witness for a slot is a pure function of the slot number, the ordered
/// active-witness list, and the accumulated skip count. Nodes with the
/// same persisted chain state always agree on the producer of any slot.
#[derive(Debug, Clone)]
pub struct WitnessSchedule {
    genesis_timestamp: i64,
    block_interval: i64,
    active_witnesses: Vec<PublicKey>,
}

impl WitnessSchedule {
    pub fn new(
        genesis_timestamp: i64,
        block_interval: i64,
        active_witnesses: Vec<PublicKey>,
    ) -> Self {
        WitnessSchedule {
            genesis_timestamp,
            block_interval,
            active_witnesses,
        }
    }

    pub fn block_interval(&self) -> i64 {
        self.block_interval
    }

    pub fn active_witnesses(&self) -> &[PublicKey] {
        &self.active_witnesses
    }

    pub fn witness_count(&self) -> usize {
        self.active_witnesses.len()
    }

    /// Replace the rotation. Takes effect from the next slot boundary;
    /// already-validated blocks are never re-judged.
    pub fn set_active_witnesses(&mut self, witnesses: Vec<PublicKey>) {
        debug!(count = witnesses.len(), "active witness set replaced");
        self.active_witnesses = witnesses;
    }

    /// Slot index for a millisecond timestamp. The genesis block occupies
    /// slot 0; anything at or before the genesis timestamp maps there.
    pub fn slot_at_time(&self, timestamp: i64) -> u64 {
        if timestamp <= self.genesis_timestamp {
            return 0;
        }
        ((timestamp - self.genesis_timestamp) / self.block_interval) as u64
    }

    /// Millisecond timestamp at which a slot opens
    pub fn slot_time(&self, slot: u64) -> i64 {
        self.genesis_timestamp + slot as i64 * self.block_interval
    }

    /// The witness that must produce the block for `slot`, given the skip
    /// count accumulated by the chain up to its head.
    pub fn scheduled_witness(
        &self,
        slot: u64,
        accumulated_skips: u64,
    ) -> Result<PublicKey, ConsensusError> {
        if self.active_witnesses.is_empty() {
            return Err(ConsensusError::ValidateSchedule(
                "no active witnesses".to_string(),
            ));
        }
        let len = self.active_witnesses.len() as i128;
        let index = (slot as i128 - accumulated_skips as i128).rem_euclid(len) as usize;
        Ok(self.active_witnesses[index])
    }
}
