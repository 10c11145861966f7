//! The [`OrderedKv`] trait and scan types shared by every engine.

use std::ops::Bound;

use bytes::Bytes;
use serde::Serialize;

use crate::error::KvResult;

/// Parameters of a range scan.
///
/// Both bounds are inclusive. `keys` / `values` select which halves of each
/// record are produced; engines may skip reading values entirely for a
/// keys-only scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanOptions {
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<usize>,
    pub reverse: bool,
    pub keys: bool,
    pub values: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            limit: None,
            reverse: false,
            keys: true,
            values: true,
        }
    }
}

impl ScanOptions {
    /// Ascending scan over `[start, end]` producing keys and values.
    pub fn range(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
            ..Self::default()
        }
    }

    pub fn keys_only(mut self) -> Self {
        self.keys = true;
        self.values = false;
        self
    }

    pub fn values_only(mut self) -> Self {
        self.keys = false;
        self.values = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Bounds suitable for `BTreeMap::range`, or `None` when the range is
    /// empty (`start > end`), which `BTreeMap::range` would reject.
    pub fn bounds(&self) -> Option<(Bound<&str>, Bound<&str>)> {
        if let (Some(start), Some(end)) = (&self.start, &self.end) {
            if start > end {
                return None;
            }
        }
        let lower = self
            .start
            .as_deref()
            .map_or(Bound::Unbounded, Bound::Included);
        let upper = self
            .end
            .as_deref()
            .map_or(Bound::Unbounded, Bound::Included);
        Some((lower, upper))
    }
}

/// One scanned record. Fields not requested by the scan are `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanRecord {
    pub key: Option<String>,
    pub value: Option<Bytes>,
}

impl ScanRecord {
    pub fn into_key(self) -> Option<String> {
        self.key
    }

    pub fn into_value(self) -> Option<Bytes> {
        self.value
    }
}

/// Outcome of [`OrderedKv::compact`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    pub live_keys: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Pull-based scan result. Exhaustion is the end-of-stream signal; a
/// failed record is yielded as `Err` in its place.
pub type ScanIter = Box<dyn Iterator<Item = KvResult<ScanRecord>> + Send>;

/// Ordered key-value engine.
///
/// Implementations must keep keys in lexicographic byte order and must be
/// thread-safe. Writes from one process are assumed to come from a single
/// logical writer per key range; engines serialize individual operations
/// but do not coordinate multi-key sequences.
pub trait OrderedKv: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> KvResult<Option<Bytes>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// Returns once the engine has accepted the write, with whatever
    /// durability the engine offers.
    fn put(&self, key: &str, value: Bytes) -> KvResult<()>;

    /// Remove `key`. Returns `true` if it existed.
    fn delete(&self, key: &str) -> KvResult<bool>;

    /// Range scan. Records come in ascending key order, or descending when
    /// `options.reverse` is set, and stop after `options.limit` records.
    fn scan(&self, options: &ScanOptions) -> KvResult<ScanIter>;

    /// Durability barrier for engines that buffer writes.
    fn flush(&self) -> KvResult<()> {
        Ok(())
    }

    /// Reclaim space held by overwritten and deleted records. Engines with
    /// nothing to reclaim return `None`.
    fn compact(&self) -> KvResult<Option<CompactionReport>> {
        Ok(None)
    }

    /// Delete every key in `[start, end]`. Returns the number removed.
    fn delete_range(&self, start: &str, end: &str) -> KvResult<usize> {
        let keys = self
            .scan(&ScanOptions::range(start, end).keys_only())?
            .map(|record| record.map(ScanRecord::into_key))
            .collect::<KvResult<Vec<_>>>()?;
        let mut removed = 0;
        for key in keys.into_iter().flatten() {
            if self.delete(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Apply `reverse` and `limit` to an ascending snapshot.
pub(crate) fn order_and_limit<T>(mut items: Vec<T>, options: &ScanOptions) -> Vec<T> {
    if options.reverse {
        items.reverse();
    }
    if let Some(limit) = options.limit {
        items.truncate(limit);
    }
    items
}
