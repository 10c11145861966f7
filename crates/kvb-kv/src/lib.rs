//! Ordered key-value substrate for kvbucket.
//!
//! The bucket layer needs exactly three things from storage: keys kept in
//! lexicographic byte order, inclusive range scans that end with an explicit
//! end-of-stream (and surface errors instead of dropping records), and
//! acknowledged writes. [`OrderedKv`] captures that contract.
//!
//! # Engines
//!
//! - [`MemoryKv`]: `BTreeMap` behind a `RwLock`, for tests and embedding
//! - [`LogKv`]: single append-only log file with CRC-framed records and an
//!   in-memory sorted index rebuilt on open; scans read values lazily
//!
//! # Design Rules
//!
//! 1. Scans are pull-based: a record is produced only when the caller asks.
//! 2. A scan sees the key set as it was when the scan started.
//! 3. A write returns only after the engine has accepted it.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod log_file;
pub mod memory;
pub mod traits;

pub use error::{KvError, KvResult};
pub use log_file::{LogKv, LogKvConfig, SyncMode};
pub use memory::MemoryKv;
pub use traits::{CompactionReport, OrderedKv, ScanIter, ScanOptions, ScanRecord};
