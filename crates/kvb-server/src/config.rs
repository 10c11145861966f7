use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use kvb_crypto::{AccountIdConfig, HasherConfig};
use kvb_store::StoreConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Server configuration, usually read from a TOML file.
///
/// The top-level `[hash]` section selects the digest used for stored
/// revisions. It is the only place to set it: `[store]` rejects a `hash`
/// key.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Answer cross-origin requests from any origin.
    pub allow_cors: bool,
    /// Write the process id here while serving.
    pub pid_file: Option<PathBuf>,
    pub store: StoreConfig,
    pub hash: HasherConfig,
    pub account: AccountIdConfig,
    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 9000)),
            allow_cors: false,
            pid_file: None,
            store: StoreConfig::default(),
            hash: HasherConfig::default(),
            account: AccountIdConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read a TOML config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(text: &str) -> ServerResult<Self> {
        toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> ServerResult<String> {
        toml::to_string_pretty(self).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Store settings with the top-level hash selection applied.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            hash: self.hash,
            ..self.store.clone()
        }
    }
}

/// Account credentials for [`crate::AccountAuth`].
///
/// Maps an account id to the hex SHA-256 digest of its password. An empty
/// map leaves the server open ([`crate::AllowAllAuth`]).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub accounts: BTreeMap<String, String>,
}

impl AuthConfig {
    pub fn is_open(&self) -> bool {
        self.accounts.is_empty()
    }
}
