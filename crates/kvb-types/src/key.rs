use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Revision number of an entry. Revisions start at 0.
pub type Revision = u32;

/// Chunk number inside a revision. Chunks start at 0.
pub type ChunkNo = u32;

/// Width of each zero-padded numeric key field.
pub const FIELD_WIDTH: usize = 9;

/// Largest value a numeric key field can hold.
pub const MAX_FIELD_VALUE: u32 = 999_999_999;

/// Field separator inside a key.
pub const SEPARATOR: char = '~';

/// Numeric form of "the entry has no revision".
pub const NO_REVISION: i64 = -1;

/// Length of the `~RRRRRRRRR~CCCCCCCCC` suffix appended to every prefix.
const SUFFIX_LEN: usize = 2 * (FIELD_WIDTH + 1);

/// Left-pad `value` with `'0'` up to `width` characters: `pad(5, 9) == "000000005"`.
///
/// Values wider than `width` are returned unpadded; key builders reject them
/// before they get here.
pub fn pad(value: u32, width: usize) -> String {
    format!("{value:0width$}")
}

/// Check that `prefix` can be used as the first key field.
///
/// The prefix must be non-empty and must not contain the separator, otherwise
/// another entry's keys could fall inside this entry's scan range.
pub fn validate_prefix(prefix: &str) -> Result<(), TypeError> {
    if prefix.is_empty() {
        return Err(TypeError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: "prefix is empty".into(),
        });
    }
    if prefix.contains(SEPARATOR) {
        return Err(TypeError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: format!("prefix contains the separator {SEPARATOR:?}"),
        });
    }
    Ok(())
}

fn check_field(field: &'static str, value: u32) -> Result<(), TypeError> {
    if value > MAX_FIELD_VALUE {
        return Err(TypeError::FieldOutOfRange {
            field,
            value: u64::from(value),
        });
    }
    Ok(())
}

/// Encode `prefix~RRRRRRRRR~CCCCCCCCC`.
pub fn encode(prefix: &str, revision: Revision, chunk: ChunkNo) -> Result<String, TypeError> {
    validate_prefix(prefix)?;
    check_field("revision", revision)?;
    check_field("chunk", chunk)?;

    let mut key = String::with_capacity(prefix.len() + SUFFIX_LEN);
    key.push_str(prefix);
    key.push(SEPARATOR);
    key.push_str(&pad(revision, FIELD_WIDTH));
    key.push(SEPARATOR);
    key.push_str(&pad(chunk, FIELD_WIDTH));
    Ok(key)
}

/// Decode the revision and chunk fields of a key whose prefix is
/// `prefix_len` bytes long.
///
/// Fields are taken by fixed offset; anything that is not exactly
/// `prefix ~ 9 digits ~ 9 digits` is a [`TypeError::MalformedKey`].
pub fn decode(key: &str, prefix_len: usize) -> Result<(Revision, ChunkNo), TypeError> {
    let malformed = |reason: &str| TypeError::MalformedKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let bytes = key.as_bytes();
    if bytes.len() != prefix_len + SUFFIX_LEN {
        return Err(malformed(&format!(
            "expected length {}, got {}",
            prefix_len + SUFFIX_LEN,
            bytes.len()
        )));
    }

    let rev_sep = prefix_len;
    let chunk_sep = prefix_len + 1 + FIELD_WIDTH;
    if bytes[rev_sep] != SEPARATOR as u8 || bytes[chunk_sep] != SEPARATOR as u8 {
        return Err(malformed("separator not at expected offset"));
    }

    let revision = parse_field(&bytes[rev_sep + 1..chunk_sep]).ok_or_else(|| malformed("revision field is not 9 digits"))?;
    let chunk = parse_field(&bytes[chunk_sep + 1..]).ok_or_else(|| malformed("chunk field is not 9 digits"))?;
    Ok((revision, chunk))
}

fn parse_field(digits: &[u8]) -> Option<u32> {
    if digits.len() != FIELD_WIDTH || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(
        digits
            .iter()
            .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0')),
    )
}

/// Inclusive scan bounds covering every revision and chunk of `prefix`.
///
/// The upper bound carries a full chunk field so that revision
/// 999999999 is still inside the range.
pub fn revision_range(prefix: &str) -> Result<(String, String), TypeError> {
    validate_prefix(prefix)?;
    let start = format!("{prefix}{SEPARATOR}{}", pad(0, FIELD_WIDTH));
    let end = encode(prefix, MAX_FIELD_VALUE, MAX_FIELD_VALUE)?;
    Ok((start, end))
}

/// Inclusive scan bounds covering every chunk of one revision.
pub fn chunk_range(prefix: &str, revision: Revision) -> Result<(String, String), TypeError> {
    Ok((
        encode(prefix, revision, 0)?,
        encode(prefix, revision, MAX_FIELD_VALUE)?,
    ))
}

/// A decoded chunk key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub prefix: String,
    pub revision: Revision,
    pub chunk: ChunkNo,
}

impl ChunkKey {
    pub fn new(prefix: impl Into<String>, revision: Revision, chunk: ChunkNo) -> Self {
        Self {
            prefix: prefix.into(),
            revision,
            chunk,
        }
    }

    /// Parse `key`, which must start with `prefix`.
    pub fn parse(key: &str, prefix: &str) -> Result<Self, TypeError> {
        if !key.starts_with(prefix) {
            return Err(TypeError::MalformedKey {
                key: key.to_string(),
                reason: format!("does not start with prefix {prefix:?}"),
            });
        }
        let (revision, chunk) = decode(key, prefix.len())?;
        Ok(Self::new(prefix, revision, chunk))
    }

    /// The encoded key.
    pub fn encode(&self) -> Result<String, TypeError> {
        encode(&self.prefix, self.revision, self.chunk)
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.prefix,
            pad(self.revision, FIELD_WIDTH),
            pad(self.chunk, FIELD_WIDTH)
        )
    }
}
