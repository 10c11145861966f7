use std::io::{self, Read};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use kvb_kv::{OrderedKv, ScanIter, ScanOptions, ScanRecord};
use kvb_types::{chunk_range, revision_range, Revision};
use tracing::{debug, warn};

use crate::deadline::Deadline;
use crate::error::{StoreError, StoreResult};
use crate::sink::BucketSink;

/// Reads chunk keys and revision payloads.
#[derive(Clone)]
pub struct ChunkedReader {
    kv: Arc<dyn OrderedKv>,
}

impl ChunkedReader {
    pub fn new(kv: Arc<dyn OrderedKv>) -> Self {
        Self { kv }
    }

    /// Every key of `prefix`, all revisions and chunks, in key order.
    pub fn read_all(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let (start, end) = revision_range(prefix)?;
        let keys = self
            .kv
            .scan(&ScanOptions::range(start, end).keys_only())
            .map_err(StoreError::Scan)?
            .map(|record| record.map(ScanRecord::into_key))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                warn!(prefix, error = %e, "key scan failed");
                StoreError::Scan(e)
            })?;
        Ok(keys.into_iter().flatten().collect())
    }

    /// Stream the chunks of one revision in chunk order.
    ///
    /// A revision with no chunks produces an empty stream.
    pub fn read_revision(&self, prefix: &str, revision: Revision) -> StoreResult<ChunkStream> {
        let (start, end) = chunk_range(prefix, revision)?;
        let inner = self
            .kv
            .scan(&ScanOptions::range(start, end).values_only())
            .map_err(StoreError::Scan)?;
        debug!(prefix, revision, "opened revision stream");
        Ok(ChunkStream::new(prefix, revision, inner))
    }

    /// Number of chunks stored for one revision.
    pub fn chunk_count(&self, prefix: &str, revision: Revision) -> StoreResult<u32> {
        let (start, end) = chunk_range(prefix, revision)?;
        let mut count = 0u32;
        for record in self
            .kv
            .scan(&ScanOptions::range(start, end).keys_only())
            .map_err(StoreError::Scan)?
        {
            record.map_err(StoreError::Scan)?;
            count += 1;
        }
        Ok(count)
    }
}

impl std::fmt::Debug for ChunkedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedReader").finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StreamState {
    Open,
    Complete,
    Failed,
}

/// Pull-based stream over the chunks of one revision.
///
/// Each call to `next` reads one record from the engine, so a slow consumer
/// slows the scan down with it. `None` means every chunk was delivered. After
/// an `Err` the stream is fused and never reports completion.
pub struct ChunkStream {
    inner: ScanIter,
    prefix: String,
    revision: Revision,
    deadline: Deadline,
    delivered: u32,
    state: StreamState,
}

impl ChunkStream {
    fn new(prefix: &str, revision: Revision, inner: ScanIter) -> Self {
        Self {
            inner,
            prefix: prefix.to_string(),
            revision,
            deadline: Deadline::none(),
            delivered: 0,
            state: StreamState::Open,
        }
    }

    /// Fail with `DeadlineExceeded` if a chunk is pulled after `deadline`.
    /// An idle deadline is renewed after every delivered chunk.
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Chunks handed out so far.
    pub fn chunks_delivered(&self) -> u32 {
        self.delivered
    }

    /// True once the end of the revision was reached without error.
    pub fn is_complete(&self) -> bool {
        self.state == StreamState::Complete
    }

    pub fn is_failed(&self) -> bool {
        self.state == StreamState::Failed
    }

    /// `std::io::Read` view of the payload.
    pub fn into_reader(self) -> ChunkStreamReader {
        ChunkStreamReader {
            stream: self,
            current: Bytes::new(),
        }
    }

    /// Drain the stream into a [`BucketSink`].
    pub fn collect_bytes(self) -> StoreResult<BucketSink> {
        let mut sink = BucketSink::new();
        for chunk in self {
            sink.write(chunk?);
        }
        Ok(sink)
    }

    fn fail(&mut self, error: StoreError) -> Option<StoreResult<Bytes>> {
        warn!(
            prefix = %self.prefix,
            revision = self.revision,
            delivered = self.delivered,
            error = %error,
            "revision stream failed"
        );
        self.state = StreamState::Failed;
        Some(Err(error))
    }
}

impl Iterator for ChunkStream {
    type Item = StoreResult<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != StreamState::Open {
            return None;
        }
        if let Err(e) = self.deadline.check("read revision") {
            return self.fail(e);
        }
        match self.inner.next() {
            None => {
                self.state = StreamState::Complete;
                debug!(
                    prefix = %self.prefix,
                    revision = self.revision,
                    chunks = self.delivered,
                    "revision stream complete"
                );
                None
            }
            Some(Ok(record)) => match record.into_value() {
                Some(value) => {
                    self.delivered += 1;
                    self.deadline.renew();
                    Some(Ok(value))
                }
                None => {
                    let error = StoreError::MissingValue {
                        prefix: self.prefix.clone(),
                        revision: self.revision,
                        chunk: self.delivered,
                    };
                    self.fail(error)
                }
            },
            Some(Err(e)) => self.fail(StoreError::Scan(e)),
        }
    }
}

impl std::iter::FusedIterator for ChunkStream {}

impl std::fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream")
            .field("prefix", &self.prefix)
            .field("revision", &self.revision)
            .field("delivered", &self.delivered)
            .field("state", &self.state)
            .finish()
    }
}

/// `Read` adapter returned by [`ChunkStream::into_reader`].
///
/// Stream errors surface as `io::Error`s wrapping the [`StoreError`].
#[derive(Debug)]
pub struct ChunkStreamReader {
    stream: ChunkStream,
    current: Bytes,
}

impl ChunkStreamReader {
    pub fn into_inner(self) -> ChunkStream {
        self.stream
    }
}

impl Read for ChunkStreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.current.is_empty() {
            match self.stream.next() {
                None => return Ok(0),
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(e)) => return Err(io::Error::other(e)),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}
