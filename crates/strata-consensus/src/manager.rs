use std::collections::{HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use strata_core::{merkle_root, serialize, BlockHeader, BlockRecord, Hash, KeyPair, PublicKey,
    Transaction};
use strata_exec::{CommitHandle, ExecutionEngine};
use strata_store::{ChainStore, Storage};
use tracing::{debug, info, warn};

use crate::config::ChainConfig;
use crate::error::ConsensusError;
use crate::fork_tracker::ForkVersionTracker;
use crate::fork_tree::ForkTree;
use crate::schedule::WitnessSchedule;

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

fn system_time_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The single writer of the chain. Owns the durable store, the fork tree,
/// the witness schedule, the hard-fork tracker, and the execution engine,
/// and drives them through the block acceptance protocol.
///
/// All mutation goes through `&mut self`, so interleaved block processing
/// is impossible by construction. Readers needing concurrent access go
/// through the committed store underneath.
pub struct ChainManager<S: Storage, E: ExecutionEngine> {
    config: ChainConfig,
    store: ChainStore<S>,
    tree: ForkTree,
    schedule: WitnessSchedule,
    tracker: ForkVersionTracker,
    engine: E,
    /// Undo receipts for every applied, not-yet-solidified block, in apply
    /// order. `erase_block` pops from the back.
    undo_stack: Vec<CommitHandle>,
    /// Hashes of every transaction in the recent-block window
    recent_txs: HashSet<Hash>,
    recent_by_block: VecDeque<(Hash, Vec<Hash>)>,
    clock: Clock,
}

impl<S: Storage, E: ExecutionEngine> ChainManager<S, E> {
    /// Open (or initialize) the chain.
    ///
    /// The engine must be seeded with genesis balances and nothing else;
    /// every canonical block is replayed through it here so that in-memory
    /// state, the undo stack, and the duplicate window all match the
    /// durable head.
    pub fn new(config: ChainConfig, storage: S, engine: E) -> Result<Self, ConsensusError> {
        let mut store = ChainStore::new(storage);
        store.init_genesis(&config.genesis)?;

        let active = store.active_witnesses()?;
        let schedule = WitnessSchedule::new(
            config.genesis.genesis_timestamp,
            config.genesis.block_interval_ms,
            active,
        );
        let tracker =
            ForkVersionTracker::load(&store, config.version, config.legacy_contract_scope)?;

        if store.next_maintenance_time() <= config.genesis.genesis_timestamp {
            store.set_next_maintenance_time(
                config.genesis.genesis_timestamp + config.maintenance_interval_ms,
            );
            store.commit()?;
        }

        let head_number = store.head_number();
        let solidified = store.solidified_number();

        // The fork tree holds everything from the irreversible point up;
        // rebuild it from the canonical index.
        let anchor = store
            .block_by_number(solidified)?
            .ok_or(ConsensusError::HeaderNotFound)?;
        let mut tree = ForkTree::start(anchor)?;
        for number in solidified + 1..=head_number {
            let block = store
                .block_by_number(number)?
                .ok_or_else(|| ConsensusError::ItemNotFound(format!("canonical block {}", number)))?;
            tree.push(block)?;
        }

        let mut manager = ChainManager {
            config,
            store,
            tree,
            schedule,
            tracker,
            engine,
            undo_stack: Vec::new(),
            recent_txs: HashSet::new(),
            recent_by_block: VecDeque::new(),
            clock: Box::new(system_time_ms),
        };
        manager.replay_into_engine(head_number)?;

        info!(
            head = head_number,
            solidified,
            witnesses = manager.schedule.witness_count(),
            "chain manager ready"
        );
        Ok(manager)
    }

    /// Replace the wall clock used for the future-timestamp check
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn replay_into_engine(&mut self, head_number: u64) -> Result<(), ConsensusError> {
        for number in 1..=head_number {
            let block = self
                .store
                .block_by_number(number)?
                .ok_or_else(|| ConsensusError::ItemNotFound(format!("canonical block {}", number)))?;
            let handle = self.engine.apply(&block)?;
            self.undo_stack.push(handle);
            self.record_recent(block.hash()?, &block)?;
        }
        Ok(())
    }

    // --- block acceptance --------------------------------------------------

    /// Feed one block into the chain.
    ///
    /// Duplicates are ignored. A valid block extending the head is applied
    /// directly; a valid block that makes another branch strictly longer
    /// triggers a fork switch; a valid block on a shorter branch is parked
    /// in the fork tree. A rejected block leaves every structure exactly
    /// as it was.
    pub fn push_block(&mut self, block: BlockRecord) -> Result<(), ConsensusError> {
        let hash = block.hash()?;
        if self.tree.contains(&hash) {
            debug!(hash = %hash, "ignoring known block");
            return Ok(());
        }

        self.validate_structure(&block, &hash)?;
        block
            .verify_witness_signature()
            .map_err(|_| ConsensusError::ValidateSignature(format!("block {}", hash)))?;

        let old_head = self.store.head_hash();
        let advanced = self.tree.push(block.clone())?;
        if !advanced {
            info!(
                number = block.number(),
                hash = %hash,
                "parked block on a non-longest branch"
            );
            return Ok(());
        }

        let result = if block.parent_hash() == old_head {
            self.apply_block(&block)
        } else {
            self.switch_fork(&block, old_head)
        };

        if let Err(e) = result {
            // A rejected block leaves no trace behind
            self.tree.remove_subtree(&hash);
            let head = self.store.head_hash();
            self.tree.reset_longest(&head)?;
            return Err(e);
        }

        self.tree.prune_below(self.store.solidified_number());
        Ok(())
    }

    /// Decode a block received from the network and push it
    pub fn accept_external_block(&mut self, bytes: &[u8]) -> Result<(), ConsensusError> {
        let block: BlockRecord = serialize::from_bytes(bytes)
            .map_err(|e| ConsensusError::BadBlock(format!("undecodable block: {}", e)))?;
        self.push_block(block)
    }

    /// Checks that need no chain context: number, size, merkle root,
    /// timestamp sanity
    fn validate_structure(&self, block: &BlockRecord, hash: &Hash) -> Result<(), ConsensusError> {
        let number = block.number();
        if number == 0 {
            return Err(ConsensusError::BadNumberBlock(
                "genesis cannot be pushed".to_string(),
            ));
        }
        let solidified = self.store.solidified_number();
        if number <= solidified {
            return Err(ConsensusError::BadNumberBlock(format!(
                "number {} at or below irreversible point {}",
                number, solidified
            )));
        }

        let size = block.size_bytes()?;
        if size > self.config.max_block_size {
            return Err(ConsensusError::BadBlock(format!(
                "block {} is {} bytes, limit {}",
                hash, size, self.config.max_block_size
            )));
        }
        if !block.verify_tx_root()? {
            return Err(ConsensusError::BadBlock(format!(
                "merkle root mismatch in block {}",
                hash
            )));
        }

        let now = (self.clock)();
        if block.header.timestamp > now + self.config.clock_skew_ms {
            return Err(ConsensusError::BadBlock(format!(
                "block timestamp {} is too far in the future (now {})",
                block.header.timestamp, now
            )));
        }
        Ok(())
    }

    /// Apply a block that extends the current head: schedule check,
    /// per-transaction validation, execution, then one atomic commit of
    /// every durable key the block touches.
    fn apply_block(&mut self, block: &BlockRecord) -> Result<(), ConsensusError> {
        let hash = block.hash()?;
        let head_number = self.store.head_number();
        if block.number() != head_number + 1 {
            return Err(ConsensusError::BadNumberBlock(format!(
                "expected number {}, block {} carries {}",
                head_number + 1,
                hash,
                block.number()
            )));
        }

        let slot = self.schedule.slot_at_time(block.header.timestamp);
        let head_slot = self.schedule.slot_at_time(self.store.head_timestamp());
        if slot <= head_slot {
            return Err(ConsensusError::ValidateSchedule(format!(
                "slot {} does not advance past head slot {}",
                slot, head_slot
            )));
        }
        let expected = self
            .schedule
            .scheduled_witness(slot, head_slot.saturating_sub(head_number))?;
        if expected != block.header.witness {
            return Err(ConsensusError::ValidateSchedule(format!(
                "slot {} belongs to {}, block declares {}",
                slot, expected, block.header.witness
            )));
        }

        let mut seen = HashSet::new();
        for tx in &block.txs {
            let tx_hash = self.validate_transaction(tx, block.header.timestamp, &seen)?;
            seen.insert(tx_hash);
        }

        let handle = self.engine.apply(block)?;

        // Vote bookkeeping runs on a scratch copy; the live tracker only
        // changes once the block's commit has landed
        let mut tracker = self.tracker.clone();
        tracker.update(block, self.schedule.active_witnesses());
        tracker.should_be_forked();

        if let Err(e) = self.stage_chain_state(block, hash, slot, &tracker) {
            self.store.rollback();
            if let Err(undo_err) = self.engine.undo(handle) {
                return Err(ConsensusError::Fatal(format!(
                    "engine diverged after staging failure: {}",
                    undo_err
                )));
            }
            return Err(e);
        }
        if let Err(e) = self.store.commit() {
            self.store.rollback();
            if let Err(undo_err) = self.engine.undo(handle) {
                return Err(ConsensusError::Fatal(format!(
                    "engine diverged after commit failure: {}",
                    undo_err
                )));
            }
            return Err(e.into());
        }

        self.tracker = tracker;
        self.undo_stack.push(handle);
        self.record_recent(hash, block)?;
        info!(
            number = block.number(),
            hash = %hash,
            txs = block.txs.len(),
            "applied block"
        );
        Ok(())
    }

    /// Stage every durable key the block touches; committed as one unit
    fn stage_chain_state(
        &mut self,
        block: &BlockRecord,
        hash: Hash,
        slot: u64,
        tracker: &ForkVersionTracker,
    ) -> Result<(), ConsensusError> {
        self.store.stage_block(block)?;
        self.store
            .set_head(block.number(), hash, block.header.timestamp)?;
        self.store
            .set_accumulated_skips(slot.saturating_sub(block.number()));
        self.store
            .set_witness_latest_number(&block.header.witness, block.number());

        tracker.persist(&mut self.store)?;

        self.update_solidified()?;
        self.advance_maintenance(block.header.timestamp);
        Ok(())
    }

    /// Per-transaction admission: size, expiration window, Tapos
    /// reference, duplicate window, hard-fork gate, sender signature
    fn validate_transaction(
        &self,
        tx: &Transaction,
        block_time: i64,
        seen: &HashSet<Hash>,
    ) -> Result<Hash, ConsensusError> {
        let tx_hash = tx.hash()?;

        let size = tx.size_bytes()?;
        if size > self.config.max_transaction_size {
            return Err(ConsensusError::TooBigTransaction(format!(
                "{} bytes, limit {}",
                size, self.config.max_transaction_size
            )));
        }

        if tx.expiration <= block_time {
            return Err(ConsensusError::TransactionExpiration(format!(
                "expired at {}, block time {}",
                tx.expiration, block_time
            )));
        }
        if tx.expiration > block_time + self.config.max_transaction_expiration_ms {
            return Err(ConsensusError::TransactionExpiration(format!(
                "expiration {} too far past block time {}",
                tx.expiration, block_time
            )));
        }

        let head_number = self.store.head_number();
        if tx.ref_block_number > head_number {
            return Err(ConsensusError::Tapos(format!(
                "references block {} beyond head {}",
                tx.ref_block_number, head_number
            )));
        }
        if head_number - tx.ref_block_number > self.config.tapos_window {
            return Err(ConsensusError::Tapos(format!(
                "reference {} outside the recent window at head {}",
                tx.ref_block_number, head_number
            )));
        }
        match self.store.block_hash_by_number(tx.ref_block_number)? {
            Some(canonical) if canonical == tx.ref_block_hash => {}
            _ => {
                return Err(ConsensusError::Tapos(format!(
                    "reference hash for block {} is not on this chain",
                    tx.ref_block_number
                )))
            }
        }

        if seen.contains(&tx_hash) || self.recent_txs.contains(&tx_hash) {
            return Err(ConsensusError::DupTransaction(tx_hash.to_string()));
        }

        self.tracker.check_transaction_gate(tx)?;

        tx.verify_signature()
            .map_err(|_| ConsensusError::ValidateSignature(format!("transaction {}", tx_hash)))?;
        Ok(tx_hash)
    }

    // --- fork switching ----------------------------------------------------

    /// Move the head onto a strictly longer branch.
    ///
    /// Pops the losing branch back to the common ancestor, replays the
    /// winning branch oldest-first, and on any replay failure restores the
    /// original branch in full before surfacing the replay error.
    fn switch_fork(&mut self, new_block: &BlockRecord, old_head: Hash) -> Result<(), ConsensusError> {
        let new_tip = new_block.hash()?;
        let (winners, losers) =
            self.tree
                .branch_paths(&new_tip, &old_head, self.config.max_fork_depth)?;
        info!(
            new_tip = %new_tip,
            gain = winners.len(),
            depth = losers.len(),
            "switching to longer fork"
        );

        // Unwind the losing branch, newest first
        let mut popped: Vec<BlockRecord> = Vec::with_capacity(losers.len());
        for _ in 0..losers.len() {
            popped.push(self.erase_block()?);
        }

        let mut applied: Vec<BlockRecord> = Vec::with_capacity(winners.len());
        let mut failure: Option<(ConsensusError, Hash)> = None;
        for block in winners.iter().rev() {
            self.readopt(block)?;
            match self.apply_block(block) {
                Ok(()) => applied.push(block.clone()),
                Err(e) => {
                    let bad = block.hash()?;
                    failure = Some((e, bad));
                    break;
                }
            }
        }

        let Some((error, bad_hash)) = failure else {
            // The discarded branch stays queryable until pruned
            for block in popped.iter().rev() {
                self.readopt(block)?;
            }
            let head = self.store.head_hash();
            self.tree.reset_longest(&head)?;
            info!(new_head = %new_tip, "fork switch complete");
            return Ok(());
        };

        warn!(error = %error, bad = %bad_hash, "fork switch failed, restoring original branch");

        for _ in 0..applied.len() {
            self.erase_block()?;
        }
        self.tree.remove_subtree(&bad_hash);
        // The unwound winners below the failure stay parked
        for block in &applied {
            self.readopt(block)?;
        }
        for block in popped.iter().rev() {
            self.readopt(block)?;
            self.apply_block(block).map_err(|e| {
                ConsensusError::Fatal(format!("failed to restore the original branch: {}", e))
            })?;
        }
        let head = self.store.head_hash();
        self.tree.reset_longest(&head)?;
        Err(error)
    }

    /// Put a block back into the fork tree if erasure removed it
    fn readopt(&mut self, block: &BlockRecord) -> Result<(), ConsensusError> {
        if !self.tree.contains(&block.hash()?) {
            self.tree.push(block.clone())?;
        }
        Ok(())
    }

    /// Pop the current head: undo its state effects, drop its canonical
    /// index entry, and move the head pointer to its parent. Fatal at
    /// genesis, which has nothing underneath it.
    pub fn erase_block(&mut self) -> Result<BlockRecord, ConsensusError> {
        let head = self.store.head_block()?;
        if head.number() == 0 {
            return Err(ConsensusError::HeaderNotFound);
        }
        let head_hash = head.hash()?;

        let handle = self
            .undo_stack
            .pop()
            .ok_or_else(|| ConsensusError::Fatal("undo stack empty at erase".to_string()))?;
        if handle.block_number() != head.number() {
            return Err(ConsensusError::Fatal(format!(
                "undo receipt for block {} but head is {}",
                handle.block_number(),
                head.number()
            )));
        }
        self.engine.undo(handle)?;

        let parent_hash = head.parent_hash();
        let parent = self
            .store
            .get_block(&parent_hash)?
            .ok_or_else(|| ConsensusError::ItemNotFound(format!("parent block {}", parent_hash)))?;
        let parent_slot = self.schedule.slot_at_time(parent.header.timestamp);

        self.store.stage_unindex(head.number());
        self.store
            .set_head(parent.number(), parent_hash, parent.header.timestamp)?;
        self.store
            .set_accumulated_skips(parent_slot.saturating_sub(parent.number()));
        self.store.commit()?;

        self.forget_recent(&head_hash);
        self.tree.remove(&head_hash);
        if self.tree.contains(&parent_hash) {
            self.tree.reset_longest(&parent_hash)?;
        } else {
            self.tree = ForkTree::start(parent)?;
        }

        info!(number = head.number(), hash = %head_hash, "erased head block");
        Ok(head)
    }

    // --- production --------------------------------------------------------

    /// Produce and sign a block for `timestamp`, filling it with every
    /// candidate that passes admission and a dry run against head state.
    /// The caller decides whether to push it.
    pub fn produce_block(
        &self,
        keypair: &KeyPair,
        timestamp: i64,
        candidates: &[Transaction],
    ) -> Result<BlockRecord, ConsensusError> {
        let slot = self.schedule.slot_at_time(timestamp);
        let head_slot = self.schedule.slot_at_time(self.store.head_timestamp());
        if slot <= head_slot {
            return Err(ConsensusError::ValidateSchedule(format!(
                "production slot {} does not advance past head slot {}",
                slot, head_slot
            )));
        }
        let head_number = self.store.head_number();
        let expected = self
            .schedule
            .scheduled_witness(slot, head_slot.saturating_sub(head_number))?;
        if expected != keypair.public {
            return Err(ConsensusError::ValidateSchedule(format!(
                "slot {} belongs to {}",
                slot, expected
            )));
        }

        let mut included = Vec::new();
        let mut seen = HashSet::new();
        let mut budget = self.config.max_block_size;
        for tx in candidates {
            let admitted = self
                .validate_transaction(tx, timestamp, &seen)
                .and_then(|h| {
                    self.engine.dry_run(tx)?;
                    Ok(h)
                });
            match admitted {
                Ok(tx_hash) => {
                    let size = tx.size_bytes()?;
                    if size > budget {
                        break;
                    }
                    budget -= size;
                    seen.insert(tx_hash);
                    included.push(tx.clone());
                }
                Err(e) => debug!(error = %e, "dropped candidate transaction"),
            }
        }

        let tx_hashes: Result<Vec<Hash>, _> = included.iter().map(|tx| tx.hash()).collect();
        let header = BlockHeader {
            number: head_number + 1,
            parent_hash: self.store.head_hash(),
            timestamp,
            witness: keypair.public,
            version: self.config.version,
            tx_root: merkle_root(&tx_hashes?),
        };
        let mut block = BlockRecord::new(header, included);
        block.sign(&keypair.secret)?;

        info!(
            number = block.number(),
            txs = block.txs.len(),
            slot,
            "produced block"
        );
        Ok(block)
    }

    /// Point a transaction's Tapos reference at the current head
    pub fn set_transaction_reference(&self, tx: &mut Transaction) {
        tx.ref_block_number = self.store.head_number();
        tx.ref_block_hash = self.store.head_hash();
    }

    // --- maintenance and solidification ------------------------------------

    /// Replace the witness rotation (a maintenance-cycle decision made
    /// above this layer). The version vote starts over for the new set.
    pub fn set_active_witnesses(
        &mut self,
        witnesses: Vec<PublicKey>,
    ) -> Result<(), ConsensusError> {
        self.store.set_active_witnesses(&witnesses)?;
        self.schedule.set_active_witnesses(witnesses);
        self.tracker.reset_for(self.schedule.witness_count());
        self.tracker.persist(&mut self.store)?;
        self.store.commit()?;
        Ok(())
    }

    /// Recompute the irreversible point from per-witness latest numbers.
    /// A block solidifies once the configured share of witnesses has built
    /// on it; witnesses that never produced count as zero.
    fn update_solidified(&mut self) -> Result<(), ConsensusError> {
        let witnesses = self.schedule.active_witnesses();
        if witnesses.is_empty() {
            return Ok(());
        }
        let mut numbers: Vec<u64> = witnesses
            .iter()
            .map(|w| self.store.witness_latest_number(w).unwrap_or(0))
            .collect();
        numbers.sort_unstable();

        let position =
            (numbers.len() as u64 * (100 - self.config.solidified_threshold) / 100) as usize;
        let solid = numbers[position.min(numbers.len() - 1)];
        if solid > self.store.solidified_number() {
            self.store.set_solidified_number(solid)?;
            debug!(solid, "advanced irreversible point");
        }
        Ok(())
    }

    /// Roll the maintenance window forward past the given block time
    fn advance_maintenance(&mut self, block_time: i64) {
        let mut next = self.store.next_maintenance_time();
        if block_time < next {
            return;
        }
        while next <= block_time {
            next += self.config.maintenance_interval_ms;
        }
        self.store.set_next_maintenance_time(next);
        debug!(next, "maintenance window advanced");
    }

    fn record_recent(&mut self, hash: Hash, block: &BlockRecord) -> Result<(), ConsensusError> {
        let mut tx_hashes = Vec::with_capacity(block.txs.len());
        for tx in &block.txs {
            let tx_hash = tx.hash()?;
            self.recent_txs.insert(tx_hash);
            tx_hashes.push(tx_hash);
        }
        self.recent_by_block.push_back((hash, tx_hashes));
        while self.recent_by_block.len() as u64 > self.config.tapos_window {
            if let Some((_, old)) = self.recent_by_block.pop_front() {
                for tx_hash in old {
                    self.recent_txs.remove(&tx_hash);
                }
            }
        }
        Ok(())
    }

    fn forget_recent(&mut self, hash: &Hash) {
        if let Some(pos) = self.recent_by_block.iter().position(|(h, _)| h == hash) {
            if let Some((_, tx_hashes)) = self.recent_by_block.remove(pos) {
                for tx_hash in tx_hashes {
                    self.recent_txs.remove(&tx_hash);
                }
            }
        }
    }

    // --- read surface ------------------------------------------------------

    pub fn head_number(&self) -> u64 {
        self.store.head_number()
    }

    pub fn head_hash(&self) -> Hash {
        self.store.head_hash()
    }

    pub fn head_timestamp(&self) -> i64 {
        self.store.head_timestamp()
    }

    pub fn head_block(&self) -> Result<BlockRecord, ConsensusError> {
        Ok(self.store.head_block()?)
    }

    pub fn solidified_number(&self) -> u64 {
        self.store.solidified_number()
    }

    pub fn has_blocks(&self) -> bool {
        self.store.has_blocks()
    }

    /// Canonical block at a number, if one is indexed there
    pub fn block_by_number(&self, number: u64) -> Result<Option<BlockRecord>, ConsensusError> {
        Ok(self.store.block_by_number(number)?)
    }

    /// Look a block up by hash: the durable store first, then branches
    /// still parked in the fork tree
    pub fn block_by_hash(&self, hash: &Hash) -> Result<Option<BlockRecord>, ConsensusError> {
        if let Some(block) = self.store.get_block(hash)? {
            return Ok(Some(block));
        }
        Ok(self.tree.get(hash).cloned())
    }

    pub fn contains_block(&self, hash: &Hash) -> bool {
        self.store.contains_block(hash) || self.tree.contains(hash)
    }

    pub fn accumulated_skips(&self) -> u64 {
        self.store.accumulated_skips()
    }

    pub fn next_maintenance_time(&self) -> i64 {
        self.store.next_maintenance_time()
    }

    pub fn forked(&self) -> bool {
        self.tracker.forked()
    }

    pub fn fork_tree(&self) -> &ForkTree {
        &self.tree
    }

    pub fn schedule(&self) -> &WitnessSchedule {
        &self.schedule
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn store(&self) -> &ChainStore<S> {
        &self.store
    }
}
