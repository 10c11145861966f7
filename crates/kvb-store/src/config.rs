use std::path::PathBuf;
use std::time::Duration;

use kvb_crypto::HasherConfig;
use kvb_kv::SyncMode;
use serde::{Deserialize, Serialize};

/// Default size of the chunks a payload is split into.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// File name of the log engine inside `data_dir`.
pub const LOG_FILE_NAME: &str = "buckets.log";

/// Store configuration, the `[store]` section of the server config.
///
/// Unknown keys are rejected so a misplaced setting fails loudly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory of the on-disk log. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub sync: SyncMode,
    pub chunk_size: usize,
    /// Per-operation timeout in milliseconds. `None` disables deadlines.
    pub op_timeout_ms: Option<u64>,
    /// Delete the chunks of a revision whose write failed part-way.
    pub rollback_partial: bool,
    /// Digest for stored revisions. Not read from the `[store]` section;
    /// the embedding configuration supplies it.
    #[serde(skip)]
    pub hash: HasherConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            sync: SyncMode::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            op_timeout_ms: Some(30_000),
            rollback_partial: true,
            hash: HasherConfig::default(),
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn on_disk(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }

    pub fn op_timeout(&self) -> Option<Duration> {
        self.op_timeout_ms.map(Duration::from_millis)
    }

    /// Chunk size clamped to at least one byte.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(LOG_FILE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.op_timeout(), Some(Duration::from_secs(30)));
        assert!(config.rollback_partial);
        assert!(config.log_path().is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"chunk_size": 16, "op_timeout_ms": null}"#).unwrap();
        assert_eq!(config.chunk_size, 16);
        assert_eq!(config.op_timeout(), None);
        assert!(config.rollback_partial);
    }

    #[test]
    fn unknown_and_hash_keys_are_rejected() {
        assert!(serde_json::from_str::<StoreConfig>(r#"{"chunk_sise": 16}"#).is_err());
        assert!(serde_json::from_str::<StoreConfig>(r#"{"hash": {}}"#).is_err());
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let config = StoreConfig {
            chunk_size: 0,
            ..StoreConfig::default()
        };
        assert_eq!(config.effective_chunk_size(), 1);
    }

    #[test]
    fn log_path_joins_file_name() {
        let config = StoreConfig::on_disk("/var/lib/kvb");
        assert_eq!(
            config.log_path(),
            Some(PathBuf::from("/var/lib/kvb").join(LOG_FILE_NAME))
        );
    }
}
