use std::collections::BTreeSet;
use std::sync::Arc;

use kvb_kv::{OrderedKv, ScanOptions};
use kvb_types::{decode, revision_range, Revision, MAX_FIELD_VALUE, NO_REVISION};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Derives an entry's revisions from its chunk keys.
///
/// Every query is a keys-only scan over the whole prefix, so the cost grows
/// with the number of stored chunks. Nothing here coordinates writers; see
/// [`crate::WriteRegistry`].
#[derive(Clone)]
pub struct RevisionIndex {
    kv: Arc<dyn OrderedKv>,
}

impl RevisionIndex {
    pub fn new(kv: Arc<dyn OrderedKv>) -> Self {
        Self { kv }
    }

    /// Highest revision stored under `prefix`, `None` when there is none.
    pub fn current_revision(&self, prefix: &str) -> StoreResult<Option<Revision>> {
        let mut current = None;
        self.for_each_revision(prefix, |revision| {
            current = current.max(Some(revision));
        })?;
        debug!(prefix, ?current, "resolved current revision");
        Ok(current)
    }

    /// [`current_revision`](Self::current_revision) with `-1` for "no revision".
    pub fn current_revision_number(&self, prefix: &str) -> StoreResult<i64> {
        Ok(self
            .current_revision(prefix)?
            .map_or(NO_REVISION, i64::from))
    }

    /// Every revision stored under `prefix`.
    pub fn revisions(&self, prefix: &str) -> StoreResult<BTreeSet<Revision>> {
        let mut revisions = BTreeSet::new();
        self.for_each_revision(prefix, |revision| {
            revisions.insert(revision);
        })?;
        Ok(revisions)
    }

    /// Number the next write of `prefix` should use: 0 for a new entry.
    pub fn next_revision(&self, prefix: &str) -> StoreResult<Revision> {
        match self.current_revision(prefix)? {
            None => Ok(0),
            Some(current) if current >= MAX_FIELD_VALUE => {
                Err(StoreError::RevisionSpaceExhausted(prefix.to_string()))
            }
            Some(current) => Ok(current + 1),
        }
    }

    fn for_each_revision(&self, prefix: &str, mut visit: impl FnMut(Revision)) -> StoreResult<()> {
        let (start, end) = revision_range(prefix)?;
        let records = self
            .kv
            .scan(&ScanOptions::range(start, end).keys_only())
            .map_err(StoreError::Scan)?;
        for record in records {
            let record = record.map_err(|e| {
                warn!(prefix, error = %e, "revision scan failed");
                StoreError::Scan(e)
            })?;
            if let Some(key) = record.key {
                let (revision, _) = decode(&key, prefix.len())?;
                visit(revision);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RevisionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionIndex").finish_non_exhaustive()
    }
}
