use thiserror::Error;

/// Errors produced by key encoding and decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// The key does not have the fixed-width `prefix~revision~chunk` shape.
    #[error("malformed key {key:?}: {reason}")]
    MalformedKey { key: String, reason: String },

    /// A revision or chunk number does not fit in nine decimal digits.
    #[error("{field} {value} exceeds the 9-digit key field")]
    FieldOutOfRange { field: &'static str, value: u64 },

    /// The entry prefix cannot be used to build keys.
    #[error("invalid prefix {prefix:?}: {reason}")]
    InvalidPrefix { prefix: String, reason: String },
}
