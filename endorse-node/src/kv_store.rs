use endorse_common::KvWrite;

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use im::HashMap as ImHashMap;

/// World state. Cloning shares the same map; snapshots are cheap persistent copies.
#[derive(Clone, Default)]
pub struct KVStore(Arc<RwLock<ImHashMap<String, Vec<u8>>>>);

impl KVStore {
    pub fn new() -> Self {
        Self(Default::default())
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.0.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Applies a committed write set; `None` values delete.
    pub fn apply(&self, writes: &[KvWrite]) {
        let mut map = self.0.write().unwrap_or_else(PoisonError::into_inner);
        for write in writes {
            match &write.value {
                Some(value) => {
                    map.insert(write.key.clone(), value.clone());
                }
                None => {
                    map.remove(&write.key);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read view a chaincode executes against. Never changes once taken.
#[derive(Clone)]
pub struct Snapshot(ImHashMap<String, Vec<u8>>);

impl Snapshot {
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.0.get(key).cloned()
    }
}

/// Writes collected during one execution. The last write to a key wins.
#[derive(Debug, Default)]
pub struct WriteBatch(BTreeMap<String, Option<Vec<u8>>>);

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: &[u8]) {
        self.0.insert(key.into(), Some(value.into()));
    }

    pub fn delete(&mut self, key: &str) {
        self.0.insert(key.into(), None);
    }

    /// Pending value for `key`: `Some(None)` if it was deleted in this batch.
    pub fn pending(&self, key: &str) -> Option<Option<Vec<u8>>> {
        self.0.get(key).cloned()
    }

    /// Key-ordered, so identical executions produce identical write sets.
    pub fn into_write_set(self) -> Vec<KvWrite> {
        self.0
            .into_iter()
            .map(|(key, value)| KvWrite { key, value })
            .collect()
    }
}
