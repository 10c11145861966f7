//! Revisioned, chunked object storage for kvbucket.
//!
//! An *entry* is identified by a caller-chosen prefix. Each write of an
//! entry creates a new immutable *revision*; each revision is stored as a
//! sequence of *chunks*, one key-value record per chunk, under keys of the
//! form `prefix~revision~chunk` (see `kvb-types`). Payloads therefore stream
//! in and out without ever being held in memory as a whole.
//!
//! # Components
//!
//! - [`RevisionIndex`]: current revision of an entry, derived from its keys
//! - [`ChunkedReader`] / [`ChunkStream`]: pull-based, ordered chunk reads
//! - [`ChunkedWriter`]: numbered chunk writes with an integrity digest
//! - [`BucketSink`]: in-memory accumulator for small responses
//! - [`BucketStore`]: facade adding per-prefix write exclusion, deadlines
//!   and in-flight revision tracking
//!
//! # Design Rules
//!
//! 1. The current revision is always computed from the chunk keys; there is
//!    no separate counter that could drift from them.
//! 2. Revisions are immutable. A write always allocates a new number.
//! 3. Chunk `i` is acknowledged by the engine before chunk `i + 1` is sent.
//! 4. A read either reaches the end of the revision or yields an error;
//!    truncated payloads are never delivered silently.
//! 5. Failures are logged and returned, never retried here.

pub mod config;
pub mod deadline;
pub mod error;
pub mod reader;
pub mod registry;
pub mod revision;
pub mod sink;
pub mod store;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{StoreConfig, DEFAULT_CHUNK_SIZE, LOG_FILE_NAME};
pub use deadline::Deadline;
pub use error::{StoreError, StoreResult};
pub use reader::{ChunkStream, ChunkStreamReader, ChunkedReader};
pub use registry::{WriteGuard, WriteRegistry};
pub use revision::RevisionIndex;
pub use sink::BucketSink;
pub use store::BucketStore;
pub use writer::{ChunkedWriter, ReaderChunks, RevisionHandle};
