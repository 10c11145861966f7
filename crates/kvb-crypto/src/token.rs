use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::error;

use crate::error::{CryptoError, CryptoResult};

/// Number of random bytes drawn for every token.
pub const TOKEN_SOURCE_BYTES: usize = 256;

/// Base64 length of [`TOKEN_SOURCE_BYTES`] bytes, the longest possible token.
const MAX_TOKEN_LEN: usize = TOKEN_SOURCE_BYTES.div_ceil(3) * 4;

/// Random string of `len` characters: base64 of 256 bytes from the OS
/// CSPRNG, truncated.
///
/// Fails with [`CryptoError::EntropyExhausted`] if the random source cannot
/// deliver; callers must handle that case.
pub fn random_string(len: usize) -> CryptoResult<String> {
    random_string_from(&mut OsRng, len)
}

/// Same as [`random_string`] with an explicit random source.
pub fn random_string_from<R: RngCore + ?Sized>(rng: &mut R, len: usize) -> CryptoResult<String> {
    if len > MAX_TOKEN_LEN {
        return Err(CryptoError::TokenTooLong {
            requested: len,
            max: MAX_TOKEN_LEN,
        });
    }

    let mut buf = [0u8; TOKEN_SOURCE_BYTES];
    rng.try_fill_bytes(&mut buf).map_err(|e| {
        error!(error = %e, "secure random source failed");
        CryptoError::EntropyExhausted(e.to_string())
    })?;

    let mut token = base64::engine::general_purpose::STANDARD.encode(buf);
    token.truncate(len);
    Ok(token)
}
