use strata_core::{serialize, BlockRecord, GenesisConfig, Hash, PublicKey};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::storage::Storage;

/// Key layout for the canonical ledger and the dynamic properties
mod keys {
    pub const BLOCK: &[u8] = b"blk:";
    pub const NUMBER: &[u8] = b"num:";
    pub const WITNESS_LATEST: &[u8] = b"wit:";

    pub const HEAD_NUMBER: &[u8] = b"prop:latestBlockHeaderNumber";
    pub const HEAD_HASH: &[u8] = b"prop:latestBlockHeaderHash";
    pub const HEAD_TIMESTAMP: &[u8] = b"prop:latestBlockHeaderTimestamp";
    pub const SOLIDIFIED: &[u8] = b"prop:latestSolidifiedBlockNumber";
    pub const FORKED: &[u8] = b"prop:forked";
    pub const VERSION_SLOTS: &[u8] = b"prop:versionSlots";
    pub const SKIPS: &[u8] = b"prop:accumulatedSkips";
    pub const NEXT_MAINTENANCE: &[u8] = b"prop:nextMaintenanceTime";
    pub const WITNESSES: &[u8] = b"prop:activeWitnesses";
    pub const CHAIN_ID: &[u8] = b"prop:chainId";
}

fn block_key(hash: &Hash) -> Vec<u8> {
    [keys::BLOCK, hash.as_bytes()].concat()
}

fn number_key(number: u64) -> Vec<u8> {
    [keys::NUMBER, &number.to_be_bytes()[..]].concat()
}

fn witness_latest_key(witness: &PublicKey) -> Vec<u8> {
    [keys::WITNESS_LATEST, witness.as_bytes()].concat()
}

/// The canonical, linear, append-only chain plus durable scalar state.
///
/// Mutations are staged on the underlying storage; `commit` applies every
/// key a block touched as one unit. Only the chain manager mutates this
/// store, so readers always observe whole committed blocks.
pub struct ChainStore<S: Storage> {
    storage: S,
}

impl<S: Storage> ChainStore<S> {
    pub fn new(storage: S) -> Self {
        ChainStore { storage }
    }

    /// Whether a genesis block has ever been written
    pub fn is_initialized(&self) -> bool {
        self.storage.exists(keys::HEAD_HASH)
    }

    /// Write the genesis block and seed every dynamic property.
    /// Idempotent: a store that already has a head is left untouched.
    pub fn init_genesis(&mut self, config: &GenesisConfig) -> Result<BlockRecord, StoreError> {
        let genesis = config.genesis_block();
        if self.is_initialized() {
            debug!("chain store already initialized, keeping existing state");
            return Ok(genesis);
        }

        let genesis_hash = genesis.hash()?;
        info!(hash = %genesis_hash, "initializing genesis state");

        self.stage_block(&genesis)?;
        self.set_head(0, genesis_hash, genesis.header.timestamp)?;
        self.put_u64(keys::SOLIDIFIED, 0);
        self.put_u64(keys::SKIPS, 0);
        self.put_u64(keys::CHAIN_ID, config.chain_id);
        self.put_i64(keys::NEXT_MAINTENANCE, config.genesis_timestamp);
        self.set_active_witnesses(&config.witnesses)?;
        self.set_version_slots(&vec![0; config.witnesses.len()])?;
        self.commit()?;

        Ok(genesis)
    }

    // --- block records -----------------------------------------------------

    /// Stage a block record and its number index entry
    pub fn stage_block(&mut self, block: &BlockRecord) -> Result<(), StoreError> {
        let hash = block.hash()?;
        let bytes = serialize::to_bytes(block)?;
        self.storage.put(&block_key(&hash), &bytes);
        self.storage
            .put(&number_key(block.number()), hash.as_bytes());
        Ok(())
    }

    /// Stage removal of the number index entry (the record itself stays,
    /// the losing branch remains queryable by hash until pruned)
    pub fn stage_unindex(&mut self, number: u64) {
        self.storage.delete(&number_key(number));
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Option<BlockRecord>, StoreError> {
        match self.storage.get(&block_key(hash)) {
            Some(bytes) => Ok(Some(serialize::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains_block(&self, hash: &Hash) -> bool {
        self.storage.exists(&block_key(hash))
    }

    /// Canonical hash recorded at a block number, if any
    pub fn block_hash_by_number(&self, number: u64) -> Result<Option<Hash>, StoreError> {
        match self.storage.get(&number_key(number)) {
            Some(bytes) => Hash::from_slice(&bytes)
                .map(Some)
                .ok_or_else(|| StoreError::Corrupted("malformed number index entry".into())),
            None => Ok(None),
        }
    }

    pub fn block_by_number(&self, number: u64) -> Result<Option<BlockRecord>, StoreError> {
        match self.block_hash_by_number(number)? {
            Some(hash) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    // --- head pointers -----------------------------------------------------

    pub fn head_number(&self) -> u64 {
        self.get_u64(keys::HEAD_NUMBER).unwrap_or(0)
    }

    pub fn head_hash(&self) -> Hash {
        self.storage
            .get(keys::HEAD_HASH)
            .and_then(|b| Hash::from_slice(&b))
            .unwrap_or(Hash::ZERO)
    }

    pub fn head_timestamp(&self) -> i64 {
        self.get_i64(keys::HEAD_TIMESTAMP).unwrap_or(0)
    }

    /// Stage all three head scalars together
    pub fn set_head(&mut self, number: u64, hash: Hash, timestamp: i64) -> Result<(), StoreError> {
        self.put_u64(keys::HEAD_NUMBER, number);
        self.storage.put(keys::HEAD_HASH, hash.as_bytes());
        self.put_i64(keys::HEAD_TIMESTAMP, timestamp);
        Ok(())
    }

    /// The current head record; `HeaderNotFound` on an uninitialized store
    pub fn head_block(&self) -> Result<BlockRecord, StoreError> {
        let hash = self.head_hash();
        if hash == Hash::ZERO && !self.is_initialized() {
            return Err(StoreError::HeaderNotFound);
        }
        self.get_block(&hash)?.ok_or(StoreError::HeaderNotFound)
    }

    pub fn has_blocks(&self) -> bool {
        self.is_initialized()
    }

    // --- irreversible point ------------------------------------------------

    pub fn solidified_number(&self) -> u64 {
        self.get_u64(keys::SOLIDIFIED).unwrap_or(0)
    }

    /// Advance the irreversible point. Moving it backwards means the
    /// durable store no longer agrees with itself, which is fatal.
    pub fn set_solidified_number(&mut self, number: u64) -> Result<(), StoreError> {
        let current = self.solidified_number();
        if number < current {
            return Err(StoreError::Corrupted(format!(
                "solidified point regressed: {} -> {}",
                current, number
            )));
        }
        self.put_u64(keys::SOLIDIFIED, number);
        Ok(())
    }

    // --- hard fork state ---------------------------------------------------

    pub fn forked(&self) -> bool {
        matches!(self.storage.get(keys::FORKED), Some(ref b) if b.as_slice() == [1u8])
    }

    /// Sticky: the flag only ever transitions to true
    pub fn set_forked(&mut self) {
        self.storage.put(keys::FORKED, &[1u8]);
    }

    pub fn version_slots(&self) -> Result<Vec<u32>, StoreError> {
        match self.storage.get(keys::VERSION_SLOTS) {
            Some(bytes) => Ok(serialize::from_bytes(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn set_version_slots(&mut self, slots: &[u32]) -> Result<(), StoreError> {
        let bytes = serialize::to_bytes(&slots.to_vec())?;
        self.storage.put(keys::VERSION_SLOTS, &bytes);
        Ok(())
    }

    // --- schedule bookkeeping ----------------------------------------------

    pub fn accumulated_skips(&self) -> u64 {
        self.get_u64(keys::SKIPS).unwrap_or(0)
    }

    pub fn set_accumulated_skips(&mut self, skips: u64) {
        self.put_u64(keys::SKIPS, skips);
    }

    pub fn next_maintenance_time(&self) -> i64 {
        self.get_i64(keys::NEXT_MAINTENANCE).unwrap_or(0)
    }

    pub fn set_next_maintenance_time(&mut self, time: i64) {
        self.put_i64(keys::NEXT_MAINTENANCE, time);
    }

    pub fn active_witnesses(&self) -> Result<Vec<PublicKey>, StoreError> {
        match self.storage.get(keys::WITNESSES) {
            Some(bytes) => Ok(serialize::from_bytes(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn set_active_witnesses(&mut self, witnesses: &[PublicKey]) -> Result<(), StoreError> {
        let bytes = serialize::to_bytes(&witnesses.to_vec())?;
        self.storage.put(keys::WITNESSES, &bytes);
        Ok(())
    }

    pub fn chain_id(&self) -> u64 {
        self.get_u64(keys::CHAIN_ID).unwrap_or(0)
    }

    // --- per-witness production bookkeeping --------------------------------

    pub fn witness_latest_number(&self, witness: &PublicKey) -> Option<u64> {
        self.storage
            .get(&witness_latest_key(witness))
            .map(|b| decode_u64(&b))
    }

    pub fn set_witness_latest_number(&mut self, witness: &PublicKey, number: u64) {
        self.storage
            .put(&witness_latest_key(witness), &number.to_be_bytes());
    }

    /// All recorded (witness, latest produced number) pairs
    pub fn witness_latest_numbers(&self) -> Vec<(PublicKey, u64)> {
        let mut out = Vec::new();
        for key in self.storage.keys_with_prefix(keys::WITNESS_LATEST) {
            let pk_bytes = &key[keys::WITNESS_LATEST.len()..];
            if let (Some(witness), Some(bytes)) =
                (PublicKey::from_slice(pk_bytes), self.storage.get(&key))
            {
                out.push((witness, decode_u64(&bytes)));
            }
        }
        out
    }

    // --- transaction boundary ----------------------------------------------

    /// Apply everything staged since the last commit as one unit
    pub fn commit(&mut self) -> Result<(), StoreError> {
        self.storage.commit()
    }

    /// Drop everything staged since the last commit
    pub fn rollback(&mut self) {
        self.storage.rollback();
    }

    // --- scalar helpers ----------------------------------------------------

    fn put_u64(&mut self, key: &[u8], value: u64) {
        self.storage.put(key, &value.to_be_bytes());
    }

    fn get_u64(&self, key: &[u8]) -> Option<u64> {
        self.storage.get(key).map(|b| decode_u64(&b))
    }

    fn put_i64(&mut self, key: &[u8], value: i64) {
        self.storage.put(key, &value.to_be_bytes());
    }

    fn get_i64(&self, key: &[u8]) -> Option<i64> {
        self.storage.get(key).map(|b| {
            let mut buf = [0u8; 8];
            let n = b.len().min(8);
            buf[..n].copy_from_slice(&b[..n]);
            i64::from_be_bytes(buf)
        })
    }
}

fn decode_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_be_bytes(buf)
}
