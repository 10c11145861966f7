use std::io;

use bytes::{Bytes, BytesMut};

/// In-memory accumulator of byte chunks.
///
/// Holds everything written to it, so it is only meant for small
/// administrative payloads such as a JSON listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BucketSink {
    chunks: Vec<Bytes>,
    len: usize,
}

impl BucketSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk.
    pub fn write(&mut self, chunk: Bytes) {
        self.push_chunk(chunk);
    }

    /// All chunks in write order.
    pub fn get(&self) -> &[Bytes] {
        &self.chunks
    }

    pub fn reset(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }

    /// Total number of bytes written.
    pub fn total_len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The chunks joined into one buffer.
    pub fn concat(&self) -> Bytes {
        match self.chunks.as_slice() {
            [] => Bytes::new(),
            [only] => only.clone(),
            chunks => {
                let mut joined = BytesMut::with_capacity(self.len);
                for chunk in chunks {
                    joined.extend_from_slice(chunk);
                }
                joined.freeze()
            }
        }
    }

    pub fn into_chunks(self) -> Vec<Bytes> {
        self.chunks
    }

    fn push_chunk(&mut self, chunk: Bytes) {
        self.len += chunk.len();
        self.chunks.push(chunk);
    }
}

impl io::Write for BucketSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push_chunk(Bytes::copy_from_slice(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
