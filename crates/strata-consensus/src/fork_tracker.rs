use strata_core::{BlockRecord, PublicKey, Transaction};
use strata_store::{ChainStore, Storage, StoreError};
use tracing::{debug, info};

use crate::error::ConsensusError;

/// Tracks, per active witness, the protocol version last seen in a block
/// that witness produced. The hard fork locks in the first time every
/// slot reports the target version; the decision is persisted and never
/// reverts.
#[derive(Debug, Clone)]
pub struct ForkVersionTracker {
    slots: Vec<u32>,
    forked: bool,
    target_version: u32,
    legacy_contract_scope: u32,
}

impl ForkVersionTracker {
    /// Restore tracker state from the durable store
    pub fn load<S: Storage>(
        store: &ChainStore<S>,
        target_version: u32,
        legacy_contract_scope: u32,
    ) -> Result<Self, StoreError> {
        Ok(ForkVersionTracker {
            slots: store.version_slots()?,
            forked: store.forked(),
            target_version,
            legacy_contract_scope,
        })
    }

    pub fn forked(&self) -> bool {
        self.forked
    }

    pub fn slots(&self) -> &[u32] {
        &self.slots
    }

    /// Record the version an accepted block declares at the producing
    /// witness's slot. A changed witness-set size wipes the vector: the
    /// vote must re-form under the new ordering.
    pub fn update(&mut self, block: &BlockRecord, active_witnesses: &[PublicKey]) {
        if self.forked {
            return;
        }

        if active_witnesses.len() != self.slots.len() {
            self.slots = vec![0; active_witnesses.len()];
        }

        let witness = &block.header.witness;
        let Some(index) = active_witnesses.iter().position(|w| w == witness) else {
            return;
        };
        self.slots[index] = block.header.version;
        debug!(
            slot = index,
            version = block.header.version,
            votes = ?self.slots,
            "recorded witness version"
        );
    }

    /// True once every active witness has reported the target version.
    /// Monotonic: the first true sets the sticky flag and all later calls
    /// return true regardless of the vote vector.
    pub fn should_be_forked(&mut self) -> bool {
        if self.forked {
            return true;
        }
        if self.slots.is_empty() {
            return false;
        }
        if self.slots.iter().all(|v| *v == self.target_version) {
            self.forked = true;
            info!(version = self.target_version, "hard fork locked in");
            return true;
        }
        false
    }

    /// Policy gate: before the fork locks in, contracts beyond the legacy
    /// scope must not execute.
    pub fn check_transaction_gate(&self, tx: &Transaction) -> Result<(), ConsensusError> {
        if !self.forked && tx.contract.kind() > self.legacy_contract_scope {
            return Err(ConsensusError::NotYetHardForked);
        }
        Ok(())
    }

    /// Zero the vote vector. The sticky flag is untouched.
    pub fn reset(&mut self) {
        self.slots.fill(0);
    }

    /// Zero and resize for a new witness-set size
    pub fn reset_for(&mut self, witness_count: usize) {
        self.slots = vec![0; witness_count];
    }

    /// Stage tracker state onto the store (committed with the block that
    /// changed it)
    pub fn persist<S: Storage>(&self, store: &mut ChainStore<S>) -> Result<(), StoreError> {
        store.set_version_slots(&self.slots)?;
        if self.forked {
            store.set_forked();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{BlockHeader, Hash, KeyPair};
    use strata_store::MemoryStorage;

    fn tracker_with(slots: Vec<u32>, target: u32) -> ForkVersionTracker {
        ForkVersionTracker {
            slots,
            forked: false,
            target_version: target,
            legacy_contract_scope: 9,
        }
    }

    fn block_from(witness: PublicKey, version: u32) -> BlockRecord {
        let header = BlockHeader {
            number: 1,
            parent_hash: Hash::ZERO,
            timestamp: 3_000,
            witness,
            version,
            tx_root: Hash::ZERO,
        };
        BlockRecord::new(header, Vec::new())
    }

    #[test]
    fn test_unanimity_required() {
        let mut tracker = tracker_with(vec![7, 7, 6], 7);
        assert!(!tracker.should_be_forked());

        tracker.slots[2] = 7;
        assert!(tracker.should_be_forked());
    }

    #[test]
    fn test_flag_is_sticky_against_vote_mutation() {
        let mut tracker = tracker_with(vec![7, 7, 7], 7);
        assert!(tracker.should_be_forked());

        // A later block declaring an older version changes nothing
        tracker.slots[0] = 6;
        assert!(tracker.should_be_forked());

        tracker.reset();
        assert!(tracker.should_be_forked());
    }

    #[test]
    fn test_empty_vector_is_not_unanimous() {
        let mut tracker = tracker_with(Vec::new(), 7);
        assert!(!tracker.should_be_forked());
    }

    #[test]
    fn test_update_records_at_witness_slot() {
        let wits: Vec<PublicKey> = (0..3).map(|_| KeyPair::generate().public).collect();
        let mut tracker = tracker_with(vec![0, 0, 0], 7);

        tracker.update(&block_from(wits[1], 7), &wits);
        assert_eq!(tracker.slots(), &[0, 7, 0]);

        // Unknown witness is ignored
        tracker.update(&block_from(KeyPair::generate().public, 7), &wits);
        assert_eq!(tracker.slots(), &[0, 7, 0]);
    }

    #[test]
    fn test_size_change_resets_votes() {
        let wits: Vec<PublicKey> = (0..4).map(|_| KeyPair::generate().public).collect();
        let mut tracker = tracker_with(vec![7, 7], 7);

        tracker.update(&block_from(wits[0], 7), &wits);
        assert_eq!(tracker.slots(), &[7, 0, 0, 0]);
    }

    #[test]
    fn test_transaction_gate() {
        use strata_core::Contract;

        let sender = KeyPair::generate();
        let legacy = Transaction::new_signed(
            sender.public,
            0,
            Hash::ZERO,
            10_000,
            1,
            Contract::Transfer {
                to: KeyPair::generate().public,
                amount: 1,
            },
            &sender.secret,
        )
        .unwrap();
        let gated = Transaction::new_signed(
            sender.public,
            0,
            Hash::ZERO,
            10_000,
            1,
            Contract::AssetIssue {
                name: "GEM".to_string(),
                total_supply: 10,
            },
            &sender.secret,
        )
        .unwrap();

        let mut tracker = tracker_with(vec![7, 6], 7);
        assert!(tracker.check_transaction_gate(&legacy).is_ok());
        assert!(matches!(
            tracker.check_transaction_gate(&gated),
            Err(ConsensusError::NotYetHardForked)
        ));

        tracker.slots[1] = 7;
        assert!(tracker.should_be_forked());
        assert!(tracker.check_transaction_gate(&gated).is_ok());
    }

    #[test]
    fn test_persist_roundtrip() {
        let mut store = ChainStore::new(MemoryStorage::new());
        let mut tracker = tracker_with(vec![7, 7], 7);
        assert!(tracker.should_be_forked());

        tracker.persist(&mut store).unwrap();
        store.commit().unwrap();

        let reloaded = ForkVersionTracker::load(&store, 7, 9).unwrap();
        assert!(reloaded.forked);
        assert_eq!(reloaded.slots, vec![7, 7]);
    }
}
