//! Cryptographic helpers for kvbucket.
//!
//! Provides a streaming [`IntegrityHasher`] with configurable algorithm and
//! output encoding, the salted [`AccountIdDeriver`] used to turn an email
//! address into a short account identifier, and [`random_string`] for
//! secret tokens.
//!
//! Hashing and randomness come from `sha2`, `blake3` and `rand`; nothing here
//! implements a primitive of its own.

pub mod account;
pub mod error;
pub mod hasher;
pub mod token;

pub use account::{AccountIdConfig, AccountIdDeriver, DEFAULT_ACCOUNT_ID_LENGTH};
pub use error::{CryptoError, CryptoResult};
pub use hasher::{DigestEncoding, DigestWriter, HashAlgorithm, HasherConfig, IntegrityHasher};
pub use token::{random_string, random_string_from, TOKEN_SOURCE_BYTES};
