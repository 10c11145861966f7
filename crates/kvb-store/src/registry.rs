use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use kvb_types::Revision;
use tracing::debug;

use crate::deadline::Deadline;
use crate::error::{StoreError, StoreResult};

/// Per-prefix writer exclusion inside one process.
///
/// At most one [`WriteGuard`] exists per prefix. The guard records which
/// revision it is writing so readers can skip it until the write finishes.
#[derive(Debug, Default)]
pub struct WriteRegistry {
    active: Mutex<HashMap<String, Option<Revision>>>,
    released: Condvar,
}

impl WriteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other writer owns `prefix`, then take it.
    ///
    /// Fails with `DeadlineExceeded` if the prefix is still taken when
    /// `deadline` passes.
    pub fn begin_write(&self, prefix: &str, deadline: Deadline) -> StoreResult<WriteGuard<'_>> {
        let mut active = self.lock()?;
        while active.contains_key(prefix) {
            debug!(prefix, "waiting for concurrent writer");
            active = match deadline.remaining() {
                None => self
                    .released
                    .wait(active)
                    .map_err(|_| StoreError::Poisoned("write registry"))?,
                Some(left) if left.is_zero() => {
                    return Err(StoreError::DeadlineExceeded {
                        operation: "acquire write lock",
                    })
                }
                Some(left) => {
                    self.released
                        .wait_timeout(active, left)
                        .map_err(|_| StoreError::Poisoned("write registry"))?
                        .0
                }
            };
        }
        active.insert(prefix.to_string(), None);
        Ok(WriteGuard {
            registry: self,
            prefix: prefix.to_string(),
        })
    }

    /// Revision currently being written for `prefix`, if any.
    pub fn in_flight(&self, prefix: &str) -> Option<Revision> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(prefix)
            .copied()
            .flatten()
    }

    /// Whether a writer currently owns `prefix`.
    pub fn is_writing(&self, prefix: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(prefix)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<String, Option<Revision>>>> {
        self.active
            .lock()
            .map_err(|_| StoreError::Poisoned("write registry"))
    }
}

/// Ownership of one prefix; released on drop.
#[derive(Debug)]
pub struct WriteGuard<'a> {
    registry: &'a WriteRegistry,
    prefix: String,
}

impl WriteGuard<'_> {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Record the revision this writer allocated.
    pub fn set_revision(&self, revision: Revision) {
        let mut active = self
            .registry
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        active.insert(self.prefix.clone(), Some(revision));
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut active = self
            .registry
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        active.remove(&self.prefix);
        drop(active);
        self.registry.released.notify_all();
    }
}
