use std::io;

/// Errors from the key-value substrate.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// I/O error from the underlying file.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// CRC check failed when reading a log entry back.
    #[error("CRC mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    /// A log entry's length header does not match what the index recorded.
    #[error("invalid log entry length {length} at offset {offset}")]
    InvalidEntryLength { offset: u64, length: u32 },

    /// Record encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The index points at a record that does not hold a value.
    #[error("index entry for {key:?} does not reference a value")]
    DanglingIndex { key: String },

    /// The index sent a read for one key to another key's record.
    #[error("index entry for {key:?} points at the record of {found:?}")]
    MisdirectedIndex { key: String, found: String },

    /// A failed append could not be cut off the log; further writes are refused.
    #[error("log writer disabled after an unrecoverable failed append at offset {offset}")]
    WriterFailed { offset: u64 },

    /// A lock was poisoned by a panicking thread.
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

/// Convenience alias used throughout the substrate crate.
pub type KvResult<T> = std::result::Result<T, KvError>;
