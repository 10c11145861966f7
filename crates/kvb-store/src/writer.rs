use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;
use kvb_crypto::IntegrityHasher;
use kvb_kv::OrderedKv;
use kvb_types::{chunk_range, encode, ChunkNo, Revision};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::deadline::Deadline;
use crate::error::{StoreError, StoreResult};

/// Result of a completed revision write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionHandle {
    pub prefix: String,
    pub revision: Revision,
    pub chunks: u32,
    pub bytes: u64,
    /// Digest of the payload under the writer's hasher configuration.
    pub digest: String,
}

/// Writes a payload as numbered chunks of one revision.
///
/// Each chunk is a separate `put`; the next chunk is not sent until the
/// engine acknowledged the previous one. The writer does not pick revision
/// numbers and does not check that the revision is unused.
#[derive(Clone)]
pub struct ChunkedWriter {
    kv: Arc<dyn OrderedKv>,
    hasher: IntegrityHasher,
    rollback_partial: bool,
}

impl ChunkedWriter {
    pub fn new(kv: Arc<dyn OrderedKv>, hasher: IntegrityHasher, rollback_partial: bool) -> Self {
        Self {
            kv,
            hasher,
            rollback_partial,
        }
    }

    pub fn hasher(&self) -> &IntegrityHasher {
        &self.hasher
    }

    /// Write every fragment of `source` as chunk 0, 1, 2, ... of `revision`.
    ///
    /// An empty source writes nothing. A failure after at least one chunk was
    /// written is reported as [`StoreError::PartialRevision`]. An idle
    /// `deadline` is renewed after every chunk.
    pub fn write_revision<I, E>(
        &self,
        prefix: &str,
        revision: Revision,
        source: I,
        mut deadline: Deadline,
    ) -> StoreResult<RevisionHandle>
    where
        I: IntoIterator<Item = Result<Bytes, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        // Reject a bad prefix or revision before anything is written.
        encode(prefix, revision, 0)?;

        let mut digest = self.hasher.digest_writer();
        let mut chunk: ChunkNo = 0;
        for fragment in source {
            let written = fragment
                .map_err(|e| StoreError::Source(e.into()))
                .and_then(|data| self.write_chunk(prefix, revision, chunk, data, deadline));
            match written {
                Ok(data) => {
                    digest.update(&data);
                    chunk += 1;
                    deadline.renew();
                }
                Err(e) => return Err(self.abandon(prefix, revision, chunk, e)),
            }
        }

        let handle = RevisionHandle {
            prefix: prefix.to_string(),
            revision,
            chunks: chunk,
            bytes: digest.bytes_hashed(),
            digest: digest.finish(),
        };
        info!(
            prefix,
            revision,
            chunks = handle.chunks,
            bytes = handle.bytes,
            "revision written"
        );
        Ok(handle)
    }

    /// Write everything `reader` produces, split into `chunk_size` pieces.
    pub fn write_reader<R: Read>(
        &self,
        prefix: &str,
        revision: Revision,
        reader: R,
        chunk_size: usize,
        deadline: Deadline,
    ) -> StoreResult<RevisionHandle> {
        self.write_revision(prefix, revision, ReaderChunks::new(reader, chunk_size), deadline)
    }

    fn write_chunk(
        &self,
        prefix: &str,
        revision: Revision,
        chunk: ChunkNo,
        data: Bytes,
        deadline: Deadline,
    ) -> StoreResult<Bytes> {
        deadline.check("write revision")?;
        let key = encode(prefix, revision, chunk)?;
        self.kv.put(&key, data.clone()).map_err(StoreError::Write)?;
        debug!(key = %key, len = data.len(), "chunk written");
        Ok(data)
    }

    /// Turn a mid-write failure into the error returned to the caller,
    /// removing the written chunks first when rollback is enabled.
    fn abandon(
        &self,
        prefix: &str,
        revision: Revision,
        chunks_written: u32,
        cause: StoreError,
    ) -> StoreError {
        if chunks_written == 0 {
            warn!(prefix, revision, error = %cause, "revision write failed before the first chunk");
            return cause;
        }
        warn!(
            prefix,
            revision,
            chunks_written,
            error = %cause,
            "revision write failed part-way"
        );
        let rolled_back = self.rollback_partial && self.rollback(prefix, revision);
        StoreError::PartialRevision {
            prefix: prefix.to_string(),
            revision,
            chunks_written,
            rolled_back,
            source: Box::new(cause),
        }
    }

    fn rollback(&self, prefix: &str, revision: Revision) -> bool {
        let removed = chunk_range(prefix, revision)
            .map_err(StoreError::from)
            .and_then(|(start, end)| {
                self.kv
                    .delete_range(&start, &end)
                    .map_err(StoreError::Write)
            });
        match removed {
            Ok(removed) => {
                info!(prefix, revision, removed, "partial revision rolled back");
                true
            }
            Err(e) => {
                warn!(prefix, revision, error = %e, "partial revision rollback failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for ChunkedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedWriter")
            .field("hasher", &self.hasher)
            .field("rollback_partial", &self.rollback_partial)
            .finish_non_exhaustive()
    }
}

/// Splits a reader into chunks of `chunk_size` bytes; the last may be shorter.
#[derive(Debug)]
pub struct ReaderChunks<R> {
    reader: R,
    chunk_size: usize,
    done: bool,
}

impl<R: Read> ReaderChunks<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }
}

impl<R: Read> Iterator for ReaderChunks<R> {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        if filled == 0 {
            return None;
        }
        buf.truncate(filled);
        Some(Ok(Bytes::from(buf)))
    }
}
