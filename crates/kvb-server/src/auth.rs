use std::collections::BTreeMap;

use async_trait::async_trait;
use axum::http::HeaderMap;
use kvb_crypto::IntegrityHasher;

use crate::error::{ServerError, ServerResult};

/// Request header carrying the account id.
pub const USER_HEADER: &str = "user";
/// Request header carrying the account password.
pub const PASSWORD_HEADER: &str = "password";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub is_anonymous: bool,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self { name: "anonymous".into(), is_anonymous: true }
    }

    pub fn account(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_anonymous: false }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password { user: String, password: String },
    Anonymous,
}

impl Credentials {
    /// Read the `user` / `password` headers. Both must be present.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        match (header(USER_HEADER), header(PASSWORD_HEADER)) {
            (Some(user), Some(password)) => Self::Password { user, password },
            _ => Self::Anonymous,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Read { account: String },
    Write { account: String },
    DeriveAccountId,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { account } => write!(f, "read:{account}"),
            Self::Write { account } => write!(f, "write:{account}"),
            Self::DeriveAccountId => write!(f, "derive-account-id"),
        }
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<Identity>;
    async fn authorize(&self, identity: &Identity, action: &Action) -> ServerResult<bool>;
}

/// Accepts everyone, including anonymous callers.
pub struct AllowAllAuth;

#[async_trait]
impl AuthProvider for AllowAllAuth {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<Identity> {
        match credentials {
            Credentials::Password { user, .. } => Ok(Identity::account(user.clone())),
            Credentials::Anonymous => Ok(Identity::anonymous()),
        }
    }

    async fn authorize(&self, _identity: &Identity, _action: &Action) -> ServerResult<bool> {
        Ok(true)
    }
}

/// Password check against configured digests; an account may only touch
/// its own buckets.
pub struct AccountAuth {
    accounts: BTreeMap<String, String>,
    hasher: IntegrityHasher,
}

impl AccountAuth {
    /// `accounts` maps account ids to hex SHA-256 password digests.
    pub fn new(accounts: BTreeMap<String, String>) -> Self {
        Self { accounts, hasher: IntegrityHasher::default() }
    }
}

#[async_trait]
impl AuthProvider for AccountAuth {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<Identity> {
        let Credentials::Password { user, password } = credentials else {
            return Err(ServerError::AuthFailed("missing user or password header".into()));
        };
        match self.accounts.get(user) {
            Some(expected) if self.hasher.verify(password, expected) => Ok(Identity::account(user.clone())),
            _ => Err(ServerError::AuthFailed(format!("invalid credentials for {user:?}"))),
        }
    }

    async fn authorize(&self, identity: &Identity, action: &Action) -> ServerResult<bool> {
        Ok(match action {
            Action::Read { account } | Action::Write { account } => {
                !identity.is_anonymous && identity.name == *account
            }
            Action::DeriveAccountId => true,
        })
    }
}
