use kvb_crypto::CryptoError;
use kvb_kv::KvError;
use kvb_types::{Revision, TypeError};

/// Errors from the chunked object store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("scan failed: {0}")]
    Scan(#[source] KvError),

    #[error("write failed: {0}")]
    Write(#[source] KvError),

    #[error("storage engine error: {0}")]
    Kv(#[from] KvError),

    #[error(transparent)]
    MalformedKey(#[from] TypeError),

    /// Some chunks of a revision were written before the write failed.
    ///
    /// When `rolled_back` is set the written chunks were removed again and no
    /// keys of the revision remain.
    #[error(
        "revision {revision} of {prefix:?} is partial: {chunks_written} chunk(s) written \
         before failure (rolled back: {rolled_back}): {source}"
    )]
    PartialRevision {
        prefix: String,
        revision: Revision,
        chunks_written: u32,
        rolled_back: bool,
        #[source]
        source: Box<StoreError>,
    },

    /// The engine answered a value scan with a record that carries no value.
    #[error("chunk {chunk} of revision {revision} of {prefix:?} came back without a value")]
    MissingValue {
        prefix: String,
        revision: Revision,
        chunk: u32,
    },

    #[error("chunk source failed: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("{operation} exceeded its deadline")]
    DeadlineExceeded { operation: &'static str },

    #[error("entry not found: {0:?}")]
    EntryNotFound(String),

    #[error("revision {revision} of {prefix:?} not found")]
    RevisionNotFound { prefix: String, revision: Revision },

    #[error("revision {revision} of {prefix:?} is still being written")]
    RevisionInFlight { prefix: String, revision: Revision },

    #[error("no revision numbers left for {0:?}")]
    RevisionSpaceExhausted(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

impl StoreError {
    /// True for errors that mean "nothing stored here".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::EntryNotFound(_) | StoreError::RevisionNotFound { .. }
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
