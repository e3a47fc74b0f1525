pub mod memory;
pub mod persistent;

use crate::error::StoreError;

/// Byte-keyed storage with staged writes.
///
/// Writes accumulate as pending until `commit`, which applies them as one
/// unit; `rollback` drops them. `ChainStore` stages every key a block
/// touches and commits once per block, so a crash mid-block never leaves a
/// half-written record.
pub trait Storage: Send + Sync {
    /// Get a value by key (pending writes shadow committed data)
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Stage a key-value pair
    fn put(&mut self, key: &[u8], value: &[u8]);

    /// Stage a deletion
    fn delete(&mut self, key: &[u8]);

    /// Apply all pending writes atomically
    fn commit(&mut self) -> Result<(), StoreError>;

    /// Drop all pending writes
    fn rollback(&mut self);

    /// Check if a key exists
    fn exists(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// All keys with a given prefix (pending writes included)
    fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>>;
}

pub use memory::MemoryStorage;
pub use persistent::FileStorage;
