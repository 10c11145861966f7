use thiserror::Error;

/// Errors from hashing, derivation and token generation.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The operating system could not supply secure random bytes.
    #[error("secure random source exhausted: {0}")]
    EntropyExhausted(String),

    /// A token longer than the encoded random material was requested.
    #[error("requested token length {requested} exceeds maximum {max}")]
    TokenTooLong { requested: usize, max: usize },

    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("unknown digest encoding: {0}")]
    UnknownEncoding(String),

    /// Reading the hashed source failed before end of stream.
    #[error("I/O error while hashing: {0}")]
    Io(#[from] std::io::Error),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
