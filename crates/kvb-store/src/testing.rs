//! Fault-injecting engine for store tests.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use kvb_kv::{KvError, KvResult, MemoryKv, OrderedKv, ScanIter, ScanOptions};

/// Wraps a [`MemoryKv`] and fails scans or puts after a set number of
/// successful operations.
#[derive(Debug, Default)]
pub(crate) struct FaultyKv {
    pub(crate) inner: MemoryKv,
    /// Scans yield this many records and then an error.
    pub(crate) fail_scan_after: Option<usize>,
    /// Puts succeed this many times and then fail.
    pub(crate) fail_put_after: Option<usize>,
    /// Deletes fail.
    pub(crate) fail_deletes: bool,
    pub(crate) puts: AtomicUsize,
}

impl FaultyKv {
    pub(crate) fn failing_scans_after(records: usize) -> Self {
        Self {
            fail_scan_after: Some(records),
            ..Self::default()
        }
    }

    pub(crate) fn failing_puts_after(puts: usize) -> Self {
        Self {
            fail_put_after: Some(puts),
            ..Self::default()
        }
    }

    fn injected() -> KvError {
        KvError::Io(io::Error::other("injected fault"))
    }
}

impl OrderedKv for FaultyKv {
    fn get(&self, key: &str) -> KvResult<Option<Bytes>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: Bytes) -> KvResult<()> {
        let done = self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_put_after.is_some_and(|limit| done >= limit) {
            return Err(Self::injected());
        }
        self.inner.put(key, value)
    }

    fn delete(&self, key: &str) -> KvResult<bool> {
        if self.fail_deletes {
            return Err(Self::injected());
        }
        self.inner.delete(key)
    }

    fn scan(&self, options: &ScanOptions) -> KvResult<ScanIter> {
        let records = self.inner.scan(options)?;
        match self.fail_scan_after {
            None => Ok(records),
            Some(limit) => Ok(Box::new(
                records
                    .take(limit)
                    .chain(std::iter::once(Err(Self::injected()))),
            )),
        }
    }
}
