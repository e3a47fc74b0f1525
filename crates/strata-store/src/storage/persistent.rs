use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use strata_core::serialize;

use super::Storage;
use crate::error::StoreError;

/// File-backed storage using a single snapshot file.
///
/// Every commit rewrites the snapshot through a tmp-then-rename, so the
/// on-disk state always reflects a whole number of committed blocks.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    committed: BTreeMap<Vec<u8>, Vec<u8>>,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl FileStorage {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let path = path.into();
        let committed = if path.exists() {
            let bytes = fs::read(&path).map_err(|e| StoreError::Storage(e.to_string()))?;
            if bytes.is_empty() {
                BTreeMap::new()
            } else {
                serialize::from_bytes(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?
            }
        } else {
            BTreeMap::new()
        };

        Ok(FileStorage {
            path,
            committed,
            pending: BTreeMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush_to_disk(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Storage(e.to_string()))?;
        }

        let bytes = serialize::to_bytes(&self.committed)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes).map_err(|e| StoreError::Storage(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(())
    }
}

impl Storage for FileStorage {
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
        self.flush_to_disk()
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
