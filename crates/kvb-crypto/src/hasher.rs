use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::error::{CryptoError, CryptoResult};

/// Digest algorithm used by an [`IntegrityHasher`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            "blake3" => Ok(Self::Blake3),
            other => Err(CryptoError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Text encoding applied to a finished digest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestEncoding {
    #[default]
    Hex,
    Base64,
}

impl DigestEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hex => "hex",
            Self::Base64 => "base64",
        }
    }

    fn encode(&self, digest: &[u8]) -> String {
        match self {
            Self::Hex => hex::encode(digest),
            Self::Base64 => base64::engine::general_purpose::STANDARD.encode(digest),
        }
    }
}

impl fmt::Display for DigestEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestEncoding {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hex" => Ok(Self::Hex),
            "base64" => Ok(Self::Base64),
            other => Err(CryptoError::UnknownEncoding(other.to_string())),
        }
    }
}

/// Algorithm/encoding pair, as read from configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HasherConfig {
    pub algorithm: HashAlgorithm,
    pub encoding: DigestEncoding,
}

enum Accumulator {
    Sha256(Sha256),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

impl Accumulator {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
            HashAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
            Self::Blake3(h) => h.finalize().as_bytes().to_vec(),
        }
    }
}

/// Streaming digest accumulator.
///
/// Bytes written through [`Write`] (or [`DigestWriter::update`]) are folded
/// into the digest state; nothing else is retained. [`DigestWriter::finish`]
/// consumes the writer and returns the encoded digest.
pub struct DigestWriter {
    acc: Accumulator,
    encoding: DigestEncoding,
    bytes: u64,
}

impl DigestWriter {
    pub fn new(algorithm: HashAlgorithm, encoding: DigestEncoding) -> Self {
        Self {
            acc: Accumulator::new(algorithm),
            encoding,
            bytes: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.acc.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes folded in so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    pub fn finish(self) -> String {
        self.encoding.encode(&self.acc.finalize())
    }
}

impl Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for DigestWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestWriter")
            .field("encoding", &self.encoding)
            .field("bytes", &self.bytes)
            .finish()
    }
}

/// Content hasher with a configured algorithm and output encoding.
///
/// The same hasher fingerprints whole streams (revision payloads) and short
/// in-memory values (account id derivation). For any byte sequence the
/// streaming and in-memory forms produce the same digest, whatever the
/// fragment boundaries of the stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IntegrityHasher {
    algorithm: HashAlgorithm,
    encoding: DigestEncoding,
}

impl IntegrityHasher {
    pub const fn new(algorithm: HashAlgorithm, encoding: DigestEncoding) -> Self {
        Self {
            algorithm,
            encoding,
        }
    }

    pub const fn from_config(config: HasherConfig) -> Self {
        Self::new(config.algorithm, config.encoding)
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn encoding(&self) -> DigestEncoding {
        self.encoding
    }

    /// A fresh streaming accumulator with this hasher's settings.
    pub fn digest_writer(&self) -> DigestWriter {
        DigestWriter::new(self.algorithm, self.encoding)
    }

    /// Digest of an in-memory buffer.
    pub fn hash_bytes(&self, data: impl AsRef<[u8]>) -> String {
        let mut writer = self.digest_writer();
        writer.update(data.as_ref());
        writer.finish()
    }

    /// Digest of everything `reader` yields up to end of stream.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> CryptoResult<String> {
        let mut writer = self.digest_writer();
        io::copy(&mut reader, &mut writer)?;
        Ok(writer.finish())
    }

    /// Digest of a sequence of fallible fragments.
    ///
    /// Stops at the first error and returns it; no digest is produced for a
    /// stream that did not reach its end.
    pub fn hash_chunks<I, B, E>(&self, chunks: I) -> Result<String, E>
    where
        I: IntoIterator<Item = Result<B, E>>,
        B: AsRef<[u8]>,
    {
        let mut writer = self.digest_writer();
        for chunk in chunks {
            writer.update(chunk?.as_ref());
        }
        Ok(writer.finish())
    }

    /// Returns `true` if `data` hashes to `expected`.
    pub fn verify(&self, data: impl AsRef<[u8]>, expected: &str) -> bool {
        self.hash_bytes(data) == expected
    }
}

impl From<HasherConfig> for IntegrityHasher {
    fn from(config: HasherConfig) -> Self {
        Self::from_config(config)
    }
}
