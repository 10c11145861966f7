use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use kvb_crypto::AccountIdDeriver;
use kvb_store::{BucketStore, StoreResult};

use crate::auth::{AccountAuth, Action, AllowAllAuth, AuthProvider, Credentials, Identity};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<BucketStore>,
    pub deriver: Arc<AccountIdDeriver>,
    pub auth: Arc<dyn AuthProvider>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// State over an already opened store. The auth provider follows
    /// `config.auth`.
    pub fn new(store: BucketStore, config: ServerConfig) -> Self {
        let auth: Arc<dyn AuthProvider> = if config.auth.is_open() {
            Arc::new(AllowAllAuth)
        } else {
            Arc::new(AccountAuth::new(config.auth.accounts.clone()))
        };
        Self {
            store: Arc::new(store),
            deriver: Arc::new(AccountIdDeriver::new(&config.account)),
            auth,
            config: Arc::new(config),
        }
    }

    /// Open the store described by `config` and build the state around it.
    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        let store = BucketStore::open(config.store_config())?;
        Ok(Self::new(store, config))
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = auth;
        self
    }

    pub fn op_timeout(&self) -> Option<Duration> {
        self.store.config().op_timeout()
    }

    /// Authenticate the request headers and check `action`.
    pub async fn authorize(&self, headers: &HeaderMap, action: Action) -> ServerResult<Identity> {
        let identity = self
            .auth
            .authenticate(&Credentials::from_headers(headers))
            .await?;
        if !self.auth.authorize(&identity, &action).await? {
            return Err(ServerError::AuthorizationDenied {
                identity: identity.name,
                action: action.to_string(),
            });
        }
        Ok(identity)
    }

    /// Run a store operation on the blocking pool, bounded by the
    /// configured operation timeout.
    pub async fn run_blocking<T, F>(&self, operation: &'static str, f: F) -> ServerResult<T>
    where
        F: FnOnce(&BucketStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_store_task(operation, self.op_timeout(), f).await
    }

    /// Run a store operation whose length grows with the payload. Only the
    /// store's own deadlines apply: lock waits are bounded and the transfer
    /// fails once it stops making progress, however long it runs overall.
    pub async fn run_transfer<T, F>(&self, operation: &'static str, f: F) -> ServerResult<T>
    where
        F: FnOnce(&BucketStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_store_task(operation, None, f).await
    }

    async fn spawn_store_task<T, F>(
        &self,
        operation: &'static str,
        limit: Option<Duration>,
        f: F,
    ) -> ServerResult<T>
    where
        F: FnOnce(&BucketStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || f(&store));
        let joined = match limit {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| ServerError::Timeout(operation))?,
            None => task.await,
        };
        joined
            .map_err(|e| ServerError::Internal(format!("{operation} task failed: {e}")))?
            .map_err(ServerError::from)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvb_store::{StoreConfig, StoreError};

    #[tokio::test]
    async fn run_blocking_maps_store_errors() {
        let state = AppState::new(BucketStore::in_memory(), ServerConfig::default());
        let err = state
            .run_blocking("open", |store| store.open_latest("a/b").map(|_| ()))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Store(StoreError::EntryNotFound(_))));
    }

    #[tokio::test]
    async fn run_blocking_returns_values() {
        let state = AppState::new(BucketStore::in_memory(), ServerConfig::default());
        let handle = state
            .run_blocking("put", |store| store.put_bytes("a/b", "hello"))
            .await
            .unwrap();
        assert_eq!(handle.revision, 0);
    }

    #[tokio::test]
    async fn run_blocking_times_out_but_transfers_do_not() {
        let config = ServerConfig {
            store: StoreConfig {
                op_timeout_ms: Some(50),
                ..StoreConfig::default()
            },
            ..ServerConfig::default()
        };
        let state = AppState::open(config).unwrap();
        let err = state
            .run_blocking("sleep", |_| {
                std::thread::sleep(Duration::from_millis(150));
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Timeout("sleep")));

        state
            .run_transfer("sleep", |_| {
                std::thread::sleep(Duration::from_millis(150));
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn configured_accounts_require_credentials() {
        let mut config = ServerConfig::default();
        config.auth.accounts.insert("acct".into(), "00".into());
        let state = AppState::new(BucketStore::in_memory(), config);
        let err = state
            .authorize(&HeaderMap::new(), Action::Read { account: "acct".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::AuthFailed(_)));
    }
}
