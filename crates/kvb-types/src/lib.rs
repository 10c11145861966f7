//! Foundation types for kvbucket.
//!
//! Every stored payload fragment lives under a three-part sortable key:
//!
//! ```text
//! <prefix>~<revision:9 digits>~<chunk:9 digits>
//! image1~000000001~000000003
//! ```
//!
//! Both numeric fields are zero-padded to the same width, so for a fixed
//! prefix the byte order of keys equals the numeric order of
//! `(revision, chunk)`. Every other crate relies on that property to get
//! revisions and chunks back in order from a plain range scan.
//!
//! # Key Types
//!
//! - [`ChunkKey`]: a decoded `(prefix, revision, chunk)` triple
//! - [`Revision`] / [`ChunkNo`]: numeric fields, bounded by [`MAX_FIELD_VALUE`]
//! - [`TypeError`]: malformed keys, out-of-range fields, invalid prefixes

pub mod error;
pub mod key;

pub use error::TypeError;
pub use key::{
    chunk_range, decode, encode, pad, revision_range, validate_prefix, ChunkKey, ChunkNo,
    Revision, FIELD_WIDTH, MAX_FIELD_VALUE, NO_REVISION, SEPARATOR,
};
