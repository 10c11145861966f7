use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hasher::{HasherConfig, IntegrityHasher};

/// Length of a derived account identifier.
pub const DEFAULT_ACCOUNT_ID_LENGTH: usize = 12;

/// Settings for [`AccountIdDeriver`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountIdConfig {
    /// Process-wide salt prepended to every email before hashing.
    pub secret_salt: String,
    /// Number of digest characters kept.
    pub id_length: usize,
    pub hash: HasherConfig,
}

impl Default for AccountIdConfig {
    fn default() -> Self {
        Self {
            secret_salt: String::new(),
            id_length: DEFAULT_ACCOUNT_ID_LENGTH,
            hash: HasherConfig::default(),
        }
    }
}

impl fmt::Debug for AccountIdConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountIdConfig")
            .field("secret_salt", &"<redacted>")
            .field("id_length", &self.id_length)
            .field("hash", &self.hash)
            .finish()
    }
}

/// Derives short, stable account identifiers from email addresses.
///
/// The identifier is `hash(salt + email)` truncated to `id_length`
/// characters. The derivation is one-way. Truncation shrinks the hash space,
/// so two emails can map to the same identifier; that is accepted, the ids
/// only need to be practically unique for the expected number of accounts.
#[derive(Clone)]
pub struct AccountIdDeriver {
    hasher: IntegrityHasher,
    salt: String,
    length: usize,
}

impl AccountIdDeriver {
    pub fn new(config: &AccountIdConfig) -> Self {
        Self {
            hasher: IntegrityHasher::from_config(config.hash),
            salt: config.secret_salt.clone(),
            length: config.id_length,
        }
    }

    pub fn derive(&self, email: &str) -> String {
        let mut salted = String::with_capacity(self.salt.len() + email.len());
        salted.push_str(&self.salt);
        salted.push_str(email);
        let mut digest = self.hasher.hash_bytes(salted.as_bytes());
        // Hex and base64 output is ASCII, so truncating by bytes is safe.
        digest.truncate(self.length);
        digest
    }

    pub fn id_length(&self) -> usize {
        self.length
    }
}

impl fmt::Debug for AccountIdDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountIdDeriver")
            .field("hasher", &self.hasher)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}
