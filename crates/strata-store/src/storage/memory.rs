use std::collections::BTreeMap;

use super::Storage;
use crate::error::StoreError;

/// In-memory storage backed by a BTreeMap, with a pending-write overlay.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    committed: BTreeMap<Vec<u8>, Vec<u8>>,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(pending) = self.pending.get(key) {
            return pending.clone();
        }
        self.committed.get(key).cloned()
    }

    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.pending.insert(key.to_vec(), Some(value.to_vec()));
    }

    fn delete(&mut self, key: &[u8]) {
        self.pending.insert(key.to_vec(), None);
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let pending = std::mem::take(&mut self.pending);
        for (key, value) in pending {
            match value {
                Some(v) => {
                    self.committed.insert(key, v);
                }
                None => {
                    self.committed.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn rollback(&mut self) {
        self.pending.clear();
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();

        for key in self.committed.keys() {
            if key.starts_with(prefix) {
                match self.pending.get(key) {
                    Some(None) => {}
                    _ => keys.push(key.clone()),
                }
            }
        }

        for (key, value) in &self.pending {
            if key.starts_with(prefix) && value.is_some() && !self.committed.contains_key(key) {
                keys.push(key.clone());
            }
        }

        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_commit() {
        let mut storage = MemoryStorage::new();
        storage.put(b"head", b"1");
        assert_eq!(storage.get(b"head"), Some(b"1".to_vec()));
        storage.commit().unwrap();
        assert_eq!(storage.get(b"head"), Some(b"1".to_vec()));
    }

    #[test]
    fn test_rollback_discards_pending() {
        let mut storage = MemoryStorage::new();
        storage.put(b"head", b"1");
        storage.commit().unwrap();

        storage.put(b"head", b"2");
        storage.delete(b"head2");
        storage.rollback();
        assert_eq!(storage.get(b"head"), Some(b"1".to_vec()));
    }

    #[test]
    fn test_delete() {
        let mut storage = MemoryStorage::new();
        storage.put(b"k", b"v");
        storage.commit().unwrap();

        storage.delete(b"k");
        assert_eq!(storage.get(b"k"), None);
        storage.commit().unwrap();
        assert!(!storage.exists(b"k"));
    }

    #[test]
    fn test_prefix_scan_sees_pending() {
        let mut storage = MemoryStorage::new();
        storage.put(b"blk:a", b"1");
        storage.commit().unwrap();
        storage.put(b"blk:b", b"2");
        storage.delete(b"blk:a");

        let keys = storage.keys_with_prefix(b"blk:");
        assert_eq!(keys, vec![b"blk:b".to_vec()]);
    }
}
