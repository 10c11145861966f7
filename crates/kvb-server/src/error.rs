use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use kvb_store::StoreError;
use kvb_types::TypeError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("authorization denied: {action} for {identity}")]
    AuthorizationDenied { identity: String, action: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] kvb_crypto::CryptoError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            Self::AuthorizationDenied { .. } => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Store(e) => store_status(e),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn store_status(error: &StoreError) -> StatusCode {
    match error {
        StoreError::EntryNotFound(_) | StoreError::RevisionNotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::RevisionInFlight { .. } => StatusCode::CONFLICT,
        StoreError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        StoreError::MalformedKey(TypeError::InvalidPrefix { .. } | TypeError::FieldOutOfRange { .. }) => {
            StatusCode::BAD_REQUEST
        }
        StoreError::PartialRevision { source, .. } => match source.as_ref() {
            StoreError::Source(_) => StatusCode::BAD_REQUEST,
            StoreError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        StoreError::Source(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "request failed");
        } else {
            tracing::debug!(status = %status, error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
