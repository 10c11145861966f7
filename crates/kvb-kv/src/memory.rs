use std::collections::BTreeMap;
use std::sync::RwLock;

use bytes::Bytes;

use crate::error::{KvError, KvResult};
use crate::traits::{order_and_limit, OrderedKv, ScanIter, ScanOptions, ScanRecord};

/// In-memory, `BTreeMap`-based ordered store.
///
/// Intended for tests and embedding. A scan copies the matching range out
/// under the read lock (values are reference-counted `Bytes`, so this is
/// cheap) and then iterates the snapshot.
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every key.
    pub fn clear(&self) -> KvResult<()> {
        self.entries
            .write()
            .map_err(|_| KvError::Poisoned("memory kv"))?
            .clear();
        Ok(())
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderedKv for MemoryKv {
    fn get(&self, key: &str) -> KvResult<Option<Bytes>> {
        let map = self
            .entries
            .read()
            .map_err(|_| KvError::Poisoned("memory kv"))?;
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, value: Bytes) -> KvResult<()> {
        let mut map = self
            .entries
            .write()
            .map_err(|_| KvError::Poisoned("memory kv"))?;
        map.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> KvResult<bool> {
        let mut map = self
            .entries
            .write()
            .map_err(|_| KvError::Poisoned("memory kv"))?;
        Ok(map.remove(key).is_some())
    }

    fn scan(&self, options: &ScanOptions) -> KvResult<ScanIter> {
        let Some(bounds) = options.bounds() else {
            return Ok(Box::new(std::iter::empty()));
        };
        let map = self
            .entries
            .read()
            .map_err(|_| KvError::Poisoned("memory kv"))?;
        let snapshot: Vec<ScanRecord> = map
            .range::<str, _>(bounds)
            .map(|(k, v)| ScanRecord {
                key: options.keys.then(|| k.clone()),
                value: options.values.then(|| v.clone()),
            })
            .collect();
        drop(map);

        Ok(Box::new(order_and_limit(snapshot, options).into_iter().map(Ok)))
    }
}

impl std::fmt::Debug for MemoryKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKv")
            .field("key_count", &self.len())
            .finish()
    }
}
