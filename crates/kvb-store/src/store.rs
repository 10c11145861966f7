use std::convert::Infallible;
use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use kvb_crypto::IntegrityHasher;
use kvb_kv::{CompactionReport, LogKv, LogKvConfig, MemoryKv, OrderedKv};
use kvb_types::{chunk_range, revision_range, Revision};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::deadline::Deadline;
use crate::error::{StoreError, StoreResult};
use crate::reader::{ChunkStream, ChunkedReader};
use crate::registry::WriteRegistry;
use crate::revision::RevisionIndex;
use crate::sink::BucketSink;
use crate::writer::{ChunkedWriter, ReaderChunks, RevisionHandle};

/// Revisioned object store over one [`OrderedKv`] engine.
///
/// Writers of the same prefix are serialized, each write allocates the next
/// revision number, and readers asking for "the latest" revision never see a
/// revision that is still being written by this store.
pub struct BucketStore {
    kv: Arc<dyn OrderedKv>,
    index: RevisionIndex,
    reader: ChunkedReader,
    writer: ChunkedWriter,
    writes: WriteRegistry,
    config: StoreConfig,
}

impl BucketStore {
    /// Open the engine described by `config`: a [`LogKv`] under
    /// `data_dir`, or a [`MemoryKv`] when no directory is set.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let kv: Arc<dyn OrderedKv> = match config.log_path() {
            Some(path) => Arc::new(LogKv::open(
                &path,
                LogKvConfig {
                    sync_mode: config.sync,
                },
            )?),
            None => Arc::new(MemoryKv::new()),
        };
        Ok(Self::with_kv(kv, config))
    }

    pub fn in_memory() -> Self {
        Self::with_kv(Arc::new(MemoryKv::new()), StoreConfig::in_memory())
    }

    pub fn with_kv(kv: Arc<dyn OrderedKv>, config: StoreConfig) -> Self {
        let hasher = IntegrityHasher::from_config(config.hash);
        Self {
            index: RevisionIndex::new(Arc::clone(&kv)),
            reader: ChunkedReader::new(Arc::clone(&kv)),
            writer: ChunkedWriter::new(Arc::clone(&kv), hasher, config.rollback_partial),
            writes: WriteRegistry::new(),
            kv,
            config,
        }
    }

    pub fn kv(&self) -> &Arc<dyn OrderedKv> {
        &self.kv
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn hasher(&self) -> &IntegrityHasher {
        self.writer.hasher()
    }

    pub fn revision_index(&self) -> &RevisionIndex {
        &self.index
    }

    pub fn chunk_reader(&self) -> &ChunkedReader {
        &self.reader
    }

    pub fn write_registry(&self) -> &WriteRegistry {
        &self.writes
    }

    /// Wall-clock deadline for a step starting now, such as a lock wait.
    pub fn deadline(&self) -> Deadline {
        Deadline::from_timeout(self.config.op_timeout())
    }

    /// Idle deadline for a transfer starting now. Streams and writes renew
    /// it on every chunk, so only a stalled transfer runs out of time.
    pub fn idle_deadline(&self) -> Deadline {
        Deadline::from_idle_timeout(self.config.op_timeout())
    }

    // ---- queries ----

    /// Highest stored revision, including one still being written.
    pub fn current_revision(&self, prefix: &str) -> StoreResult<Option<Revision>> {
        self.index.current_revision(prefix)
    }

    /// Stored revisions in ascending order.
    pub fn revisions(&self, prefix: &str) -> StoreResult<Vec<Revision>> {
        Ok(self.index.revisions(prefix)?.into_iter().collect())
    }

    /// Highest revision that is not being written by this store.
    pub fn latest_readable(&self, prefix: &str) -> StoreResult<Option<Revision>> {
        // A revision shows up in the scan only after its writer registered
        // it, so the in-flight check must come second.
        let revisions = self.index.revisions(prefix)?;
        let in_flight = self.writes.in_flight(prefix);
        Ok(revisions
            .into_iter()
            .rev()
            .find(|revision| Some(*revision) != in_flight))
    }

    /// Every chunk key of `prefix`.
    pub fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.reader.read_all(prefix)
    }

    pub fn chunk_count(&self, prefix: &str, revision: Revision) -> StoreResult<u32> {
        self.reader.chunk_count(prefix, revision)
    }

    // ---- writes ----

    /// Store the fragments of `source` as a new revision of `prefix`.
    ///
    /// An empty source is stored as one zero-length chunk so that the
    /// revision exists.
    pub fn put<I, E>(&self, prefix: &str, source: I) -> StoreResult<RevisionHandle>
    where
        I: IntoIterator<Item = Result<Bytes, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let guard = self.writes.begin_write(prefix, self.deadline())?;
        let revision = self.index.next_revision(prefix)?;
        guard.set_revision(revision);
        debug!(prefix, revision, "allocated revision");

        let deadline = self.idle_deadline();
        let handle = self
            .writer
            .write_revision(prefix, revision, source, deadline)?;
        if handle.chunks > 0 {
            return Ok(handle);
        }
        self.writer.write_revision(
            prefix,
            revision,
            std::iter::once(Ok::<_, Infallible>(Bytes::new())),
            deadline,
        )
    }

    /// Store an in-memory payload, split at the configured chunk size.
    pub fn put_bytes(&self, prefix: &str, data: impl Into<Bytes>) -> StoreResult<RevisionHandle> {
        let data = data.into();
        let chunk_size = self.config.effective_chunk_size();
        let pieces = (0..data.len())
            .step_by(chunk_size)
            .map(|start| Ok::<_, Infallible>(data.slice(start..(start + chunk_size).min(data.len()))))
            .collect::<Vec<_>>();
        self.put(prefix, pieces)
    }

    /// Store everything `reader` yields, split at the configured chunk size.
    pub fn put_reader<R: Read>(&self, prefix: &str, reader: R) -> StoreResult<RevisionHandle> {
        self.put(
            prefix,
            ReaderChunks::new(reader, self.config.effective_chunk_size()),
        )
    }

    /// Remove every revision of `prefix`. Returns the number of chunks removed.
    pub fn delete_entry(&self, prefix: &str) -> StoreResult<usize> {
        let _guard = self.writes.begin_write(prefix, self.deadline())?;
        let (start, end) = revision_range(prefix)?;
        let removed = self
            .kv
            .delete_range(&start, &end)
            .map_err(StoreError::Write)?;
        if removed == 0 {
            return Err(StoreError::EntryNotFound(prefix.to_string()));
        }
        info!(prefix, removed, "entry deleted");
        Ok(removed)
    }

    /// Reclaim engine space left by overwritten and deleted chunks. `None`
    /// when the engine has nothing to reclaim.
    pub fn compact(&self) -> StoreResult<Option<CompactionReport>> {
        let report = self.kv.compact().map_err(StoreError::Write)?;
        if let Some(report) = &report {
            info!(
                live_keys = report.live_keys,
                bytes_before = report.bytes_before,
                bytes_after = report.bytes_after,
                "store compacted"
            );
        }
        Ok(report)
    }

    /// Remove one revision. Returns the number of chunks removed.
    pub fn delete_revision(&self, prefix: &str, revision: Revision) -> StoreResult<usize> {
        let _guard = self.writes.begin_write(prefix, self.deadline())?;
        let (start, end) = chunk_range(prefix, revision)?;
        let removed = self
            .kv
            .delete_range(&start, &end)
            .map_err(StoreError::Write)?;
        if removed == 0 {
            return Err(StoreError::RevisionNotFound {
                prefix: prefix.to_string(),
                revision,
            });
        }
        info!(prefix, revision, removed, "revision deleted");
        Ok(removed)
    }

    // ---- reads ----

    /// Stream one revision. Fails if it does not exist or is still being
    /// written.
    pub fn open_revision(&self, prefix: &str, revision: Revision) -> StoreResult<ChunkStream> {
        let revisions = self.index.revisions(prefix)?;
        if revisions.is_empty() {
            return Err(StoreError::EntryNotFound(prefix.to_string()));
        }
        if !revisions.contains(&revision) {
            return Err(StoreError::RevisionNotFound {
                prefix: prefix.to_string(),
                revision,
            });
        }
        if self.writes.in_flight(prefix) == Some(revision) {
            return Err(StoreError::RevisionInFlight {
                prefix: prefix.to_string(),
                revision,
            });
        }
        Ok(self
            .reader
            .read_revision(prefix, revision)?
            .with_deadline(self.idle_deadline()))
    }

    /// Stream the latest readable revision.
    pub fn open_latest(&self, prefix: &str) -> StoreResult<ChunkStream> {
        let revision = self
            .latest_readable(prefix)?
            .ok_or_else(|| StoreError::EntryNotFound(prefix.to_string()))?;
        Ok(self
            .reader
            .read_revision(prefix, revision)?
            .with_deadline(self.idle_deadline()))
    }

    /// `open_revision` for `Some`, `open_latest` for `None`.
    pub fn open_stream(&self, prefix: &str, revision: Option<Revision>) -> StoreResult<ChunkStream> {
        match revision {
            Some(revision) => self.open_revision(prefix, revision),
            None => self.open_latest(prefix),
        }
    }

    /// Collect a whole revision into memory.
    pub fn get_bytes(&self, prefix: &str, revision: Option<Revision>) -> StoreResult<Bytes> {
        Ok(self.open_stream(prefix, revision)?.collect_bytes()?.concat())
    }

    /// Append a whole revision to `sink`. Returns the revision read.
    pub fn read_into(
        &self,
        prefix: &str,
        revision: Option<Revision>,
        sink: &mut BucketSink,
    ) -> StoreResult<Revision> {
        let stream = self.open_stream(prefix, revision)?;
        let revision = stream.revision();
        for chunk in stream {
            sink.write(chunk?);
        }
        Ok(revision)
    }

    /// Digest of a stored revision under the configured hasher.
    pub fn digest(&self, prefix: &str, revision: Option<Revision>) -> StoreResult<(Revision, String)> {
        let stream = self.open_stream(prefix, revision)?;
        let revision = stream.revision();
        let digest = self.hasher().hash_chunks(stream)?;
        Ok((revision, digest))
    }
}

impl std::fmt::Debug for BucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketStore")
            .field("config", &self.config)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FaultyKv;
    use proptest::prelude::*;
    use std::thread;
    use std::time::Duration;

    fn small_chunks() -> StoreConfig {
        StoreConfig {
            chunk_size: 2,
            ..StoreConfig::default()
        }
    }

    // ---- revisions ----

    #[test]
    fn first_write_is_revision_zero_and_revisions_increase() {
        let store = BucketStore::in_memory();
        assert_eq!(store.current_revision("doc").unwrap(), None);
        assert_eq!(store.put_bytes("doc", "one").unwrap().revision, 0);
        assert_eq!(store.put_bytes("doc", "two").unwrap().revision, 1);
        assert_eq!(store.current_revision("doc").unwrap(), Some(1));
        assert_eq!(store.revisions("doc").unwrap(), vec![0, 1]);
    }

    #[test]
    fn doc_scenario_reads_chunks_in_order() {
        let store = BucketStore::with_kv(Arc::new(MemoryKv::new()), small_chunks());
        store.put_bytes("doc", "old").unwrap();
        let handle = store.put_bytes("doc", "ABCDEF").unwrap();
        assert_eq!(handle.revision, 1);
        assert_eq!(handle.chunks, 3);

        let chunks: Vec<Bytes> = store
            .open_revision("doc", 1)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(chunks, vec!["AB", "CD", "EF"]);
        assert_eq!(store.get_bytes("doc", None).unwrap(), "ABCDEF");
        assert_eq!(store.get_bytes("doc", Some(0)).unwrap(), "old");
    }

    #[test]
    fn ghost_entry_is_not_found() {
        let store = BucketStore::in_memory();
        assert_eq!(store.revision_index().current_revision_number("ghost").unwrap(), -1);
        assert!(store.keys("ghost").unwrap().is_empty());
        assert!(matches!(store.open_latest("ghost"), Err(StoreError::EntryNotFound(_))));
        assert!(matches!(store.open_revision("ghost", 0), Err(StoreError::EntryNotFound(_))));
    }

    #[test]
    fn unknown_revision_of_existing_entry() {
        let store = BucketStore::in_memory();
        store.put_bytes("doc", "x").unwrap();
        let err = store.open_revision("doc", 9).unwrap_err();
        assert!(matches!(err, StoreError::RevisionNotFound { revision: 9, .. }));
        assert!(err.is_not_found());
    }

    #[test]
    fn empty_payload_creates_a_revision() {
        let store = BucketStore::in_memory();
        let handle = store.put_bytes("empty", Bytes::new()).unwrap();
        assert_eq!(handle.chunks, 1);
        assert_eq!(handle.bytes, 0);
        assert_eq!(store.current_revision("empty").unwrap(), Some(0));
        assert_eq!(store.get_bytes("empty", None).unwrap(), Bytes::new());
    }

    #[test]
    fn put_reader_uses_configured_chunk_size() {
        let store = BucketStore::with_kv(Arc::new(MemoryKv::new()), small_chunks());
        let handle = store.put_reader("doc", &b"hello"[..]).unwrap();
        assert_eq!(handle.chunks, 3);
        assert_eq!(store.chunk_count("doc", 0).unwrap(), 3);
        assert_eq!(store.keys("doc").unwrap().len(), 3);
    }

    // ---- in-flight and concurrency ----

    #[test]
    fn in_flight_revision_is_hidden_from_latest() {
        let store = BucketStore::in_memory();
        store.put_bytes("doc", "v0").unwrap();

        let guard = store.write_registry().begin_write("doc", Deadline::none()).unwrap();
        guard.set_revision(1);
        store
            .kv()
            .put("doc~000000001~000000000", Bytes::from_static(b"half"))
            .unwrap();

        assert_eq!(store.current_revision("doc").unwrap(), Some(1));
        assert_eq!(store.latest_readable("doc").unwrap(), Some(0));
        assert_eq!(store.get_bytes("doc", None).unwrap(), "v0");
        assert!(matches!(
            store.open_revision("doc", 1),
            Err(StoreError::RevisionInFlight { revision: 1, .. })
        ));

        drop(guard);
        assert_eq!(store.latest_readable("doc").unwrap(), Some(1));
    }

    /// Engine that runs a one-shot hook at the start of the next scan.
    struct HookKv {
        inner: MemoryKv,
        hook: std::sync::Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl OrderedKv for HookKv {
        fn get(&self, key: &str) -> kvb_kv::KvResult<Option<Bytes>> {
            self.inner.get(key)
        }
        fn put(&self, key: &str, value: Bytes) -> kvb_kv::KvResult<()> {
            self.inner.put(key, value)
        }
        fn delete(&self, key: &str) -> kvb_kv::KvResult<bool> {
            self.inner.delete(key)
        }
        fn scan(&self, options: &kvb_kv::ScanOptions) -> kvb_kv::KvResult<kvb_kv::ScanIter> {
            let hook = self.hook.lock().unwrap().take();
            if let Some(hook) = hook {
                hook();
            }
            self.inner.scan(options)
        }
    }

    #[test]
    fn writer_starting_during_latest_lookup_stays_hidden() {
        let kv = Arc::new(HookKv {
            inner: MemoryKv::new(),
            hook: std::sync::Mutex::new(None),
        });
        let store = Arc::new(BucketStore::with_kv(kv.clone(), small_chunks()));
        store.put_bytes("doc", "v0").unwrap();

        let (landed_tx, landed_rx) = std::sync::mpsc::channel::<()>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let (writer_tx, writer_rx) = std::sync::mpsc::channel();
        let writer_store = Arc::clone(&store);
        *kv.hook.lock().unwrap() = Some(Box::new(move || {
            // Start a writer and let its first chunk land before the scan runs.
            let writer = thread::spawn(move || {
                let mut step = 0;
                let source = std::iter::from_fn(move || {
                    step += 1;
                    match step {
                        1 => Some(Ok::<_, std::convert::Infallible>(Bytes::from_static(b"AB"))),
                        _ => {
                            let _ = landed_tx.send(());
                            let _ = release_rx.recv();
                            None
                        }
                    }
                });
                writer_store.put("doc", source).unwrap()
            });
            landed_rx.recv().unwrap();
            writer_tx.send(writer).unwrap();
        }));

        assert_eq!(store.latest_readable("doc").unwrap(), Some(0));
        assert_eq!(store.write_registry().in_flight("doc"), Some(1));
        assert_eq!(store.get_bytes("doc", None).unwrap(), "v0");

        release_tx.send(()).unwrap();
        let handle = writer_rx.recv().unwrap().join().unwrap();
        assert_eq!(handle.revision, 1);
        assert_eq!(store.latest_readable("doc").unwrap(), Some(1));
    }

    #[test]
    fn slow_transfers_finish_under_an_idle_timeout() {
        let config = StoreConfig {
            chunk_size: 1,
            op_timeout_ms: Some(100),
            ..StoreConfig::default()
        };
        let store = BucketStore::with_kv(Arc::new(MemoryKv::new()), config);
        let source = (0..10).map(|i| {
            thread::sleep(Duration::from_millis(30));
            Ok::<_, std::convert::Infallible>(Bytes::from(i.to_string()))
        });
        assert_eq!(store.put("doc", source).unwrap().chunks, 10);

        let mut delivered = 0;
        for chunk in store.open_latest("doc").unwrap() {
            chunk.unwrap();
            delivered += 1;
            thread::sleep(Duration::from_millis(30));
        }
        assert_eq!(delivered, 10);
    }

    #[test]
    fn concurrent_writers_get_distinct_revisions() {
        let store = Arc::new(BucketStore::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.put_bytes("shared", format!("payload {i}")).unwrap())
            })
            .collect();
        let mut revisions: Vec<Revision> = handles
            .into_iter()
            .map(|h| h.join().unwrap().revision)
            .collect();
        revisions.sort_unstable();
        assert_eq!(revisions, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn blocked_writer_hits_deadline() {
        let config = StoreConfig {
            op_timeout_ms: Some(20),
            ..StoreConfig::default()
        };
        let store = BucketStore::with_kv(Arc::new(MemoryKv::new()), config);
        let _held = store.write_registry().begin_write("doc", Deadline::none()).unwrap();
        let err = store.put_bytes("doc", "late").unwrap_err();
        assert!(matches!(err, StoreError::DeadlineExceeded { .. }));
    }

    // ---- failures ----

    #[test]
    fn failed_write_leaves_no_revision_behind() {
        let kv = Arc::new(FaultyKv::failing_puts_after(1));
        let store = BucketStore::with_kv(kv, small_chunks());
        let err = store.put_bytes("doc", "ABCD").unwrap_err();
        assert!(matches!(err, StoreError::PartialRevision { rolled_back: true, .. }));
        assert_eq!(store.current_revision("doc").unwrap(), None);
        assert!(!store.write_registry().is_writing("doc"));
    }

    #[test]
    fn read_failure_surfaces_through_get() {
        let kv = FaultyKv::failing_scans_after(1);
        for (chunk, data) in ["AB", "CD"].into_iter().enumerate() {
            let key = kvb_types::encode("doc", 0, chunk as u32).unwrap();
            kv.inner.put(&key, Bytes::from_static(data.as_bytes())).unwrap();
        }
        let store = BucketStore::with_kv(Arc::new(kv), small_chunks());
        assert!(matches!(store.get_bytes("doc", Some(0)), Err(StoreError::Scan(_))));
    }

    // ---- deletion and digests ----

    #[test]
    fn delete_revision_and_entry() {
        let store = BucketStore::in_memory();
        store.put_bytes("doc", "a").unwrap();
        store.put_bytes("doc", "b").unwrap();
        assert_eq!(store.delete_revision("doc", 1).unwrap(), 1);
        assert_eq!(store.revisions("doc").unwrap(), vec![0]);
        assert!(matches!(
            store.delete_revision("doc", 1),
            Err(StoreError::RevisionNotFound { .. })
        ));
        assert_eq!(store.delete_entry("doc").unwrap(), 1);
        assert!(matches!(store.delete_entry("doc"), Err(StoreError::EntryNotFound(_))));
    }

    #[test]
    fn digest_matches_handle_and_bytes() {
        let store = BucketStore::with_kv(Arc::new(MemoryKv::new()), small_chunks());
        let handle = store.put_bytes("doc", "ABCDEF").unwrap();
        let (revision, digest) = store.digest("doc", None).unwrap();
        assert_eq!(revision, 0);
        assert_eq!(digest, handle.digest);
        assert_eq!(digest, store.hasher().hash_bytes("ABCDEF"));
    }

    #[test]
    fn read_into_sink() {
        let store = BucketStore::with_kv(Arc::new(MemoryKv::new()), small_chunks());
        store.put_bytes("doc", "ABCDE").unwrap();
        let mut sink = BucketSink::new();
        assert_eq!(store.read_into("doc", None, &mut sink).unwrap(), 0);
        assert_eq!(sink.get().len(), 3);
        assert_eq!(sink.concat(), "ABCDE");
    }

    // ---- persistence ----

    #[test]
    fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            chunk_size: 4,
            ..StoreConfig::on_disk(dir.path())
        };
        {
            let store = BucketStore::open(config.clone()).unwrap();
            store.put_bytes("img", "first version").unwrap();
            store.put_bytes("img", "second version").unwrap();
        }
        let store = BucketStore::open(config).unwrap();
        assert_eq!(store.revisions("img").unwrap(), vec![0, 1]);
        assert_eq!(store.get_bytes("img", None).unwrap(), "second version");
        assert_eq!(store.revision_index().next_revision("img").unwrap(), 2);
    }

    #[test]
    fn deadline_uses_config() {
        let store = BucketStore::in_memory();
        assert!(store.deadline().remaining().unwrap() <= Duration::from_secs(30));
        let unbounded = BucketStore::with_kv(
            Arc::new(MemoryKv::new()),
            StoreConfig {
                op_timeout_ms: None,
                ..StoreConfig::default()
            },
        );
        assert_eq!(unbounded.deadline(), Deadline::none());
        assert_eq!(unbounded.idle_deadline(), Deadline::none());
        assert!(store.idle_deadline().is_idle());
    }

    #[test]
    fn compaction_reclaims_deleted_revisions() {
        let dir = tempfile::tempdir().unwrap();
        let store = BucketStore::open(StoreConfig {
            chunk_size: 4,
            ..StoreConfig::on_disk(dir.path())
        })
        .unwrap();
        store.put_bytes("img", "first version").unwrap();
        store.put_bytes("img", "second version").unwrap();
        store.delete_revision("img", 0).unwrap();

        let report = store.compact().unwrap().unwrap();
        assert_eq!(report.live_keys, 4);
        assert!(report.bytes_after < report.bytes_before);
        assert_eq!(store.get_bytes("img", None).unwrap(), "second version");
        assert_eq!(BucketStore::in_memory().compact().unwrap(), None);
    }

    proptest! {
        #[test]
        fn any_payload_reads_back_intact(
            payload in proptest::collection::vec(any::<u8>(), 0..300),
            chunk_size in 1usize..64,
        ) {
            let config = StoreConfig { chunk_size, ..StoreConfig::default() };
            let store = BucketStore::with_kv(Arc::new(MemoryKv::new()), config);
            let handle = store.put_bytes("p", payload.clone()).unwrap();
            let expected_chunks = payload.len().div_ceil(chunk_size).max(1) as u32;
            prop_assert_eq!(handle.chunks, expected_chunks);
            prop_assert_eq!(store.get_bytes("p", None).unwrap(), Bytes::from(payload));
        }
    }
}
