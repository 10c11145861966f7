use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Json, Response};
use kvb_store::{BucketSink, RevisionHandle, StoreError};
use kvb_types::Revision;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

use crate::auth::Action;
use crate::bridge::{forward_body, stream_body, UploadChunks, CHANNEL_DEPTH};
use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

/// Response header with the revision being served.
pub const REVISION_HEADER: &str = "x-revision";
/// Response header with the number of chunks in the served revision.
pub const CHUNKS_HEADER: &str = "x-chunks";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self { status: "ok".into() }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AccountIdRequest {
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdResponse {
    pub account_id: String,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct RevisionQuery {
    pub rev: Option<Revision>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionsResponse {
    pub prefix: String,
    pub revisions: Vec<Revision>,
    /// Highest stored revision, `-1` when there is none.
    pub current: i64,
    pub latest_readable: Option<Revision>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestResponse {
    pub prefix: String,
    pub revision: Revision,
    pub algorithm: String,
    pub encoding: String,
    pub digest: String,
}

/// Store prefix of a bucket.
///
/// Path segments arrive percent-decoded, so a segment may itself contain
/// `/`. Such segments are refused: `("a", "b/c")` and `("a/b", "c")` would
/// otherwise share the prefix `a/b/c`.
pub fn bucket_prefix(account: &str, bucket: &str) -> ServerResult<String> {
    for (what, segment) in [("account", account), ("bucket", bucket)] {
        if segment.is_empty() || segment.contains('/') {
            return Err(ServerError::BadRequest(format!(
                "{what} must be a single non-empty path segment, got {segment:?}"
            )));
        }
    }
    Ok(format!("{account}/{bucket}"))
}

/// Health check handler.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Info handler.
pub async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let hasher = state.store.hasher();
    Json(json!({
        "name": "kvb-server",
        "version": env!("CARGO_PKG_VERSION"),
        "hash_algorithm": hasher.algorithm().as_str(),
        "hash_encoding": hasher.encoding().as_str(),
        "chunk_size": state.store.config().effective_chunk_size(),
    }))
}

pub async fn account_id_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AccountIdRequest>,
) -> ServerResult<Json<AccountIdResponse>> {
    state.authorize(&headers, Action::DeriveAccountId).await?;
    let email = request.email.trim();
    if email.is_empty() {
        return Err(ServerError::BadRequest("email is empty".into()));
    }
    Ok(Json(AccountIdResponse {
        account_id: state.deriver.derive(email),
    }))
}

/// Stream a revision of a bucket, the latest readable one unless `?rev=` is given.
pub async fn get_bucket_handler(
    State(state): State<AppState>,
    Path((account, bucket)): Path<(String, String)>,
    Query(query): Query<RevisionQuery>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    let prefix = bucket_prefix(&account, &bucket)?;
    state.authorize(&headers, Action::Read { account }).await?;

    let (chunks, count) = state
        .run_blocking("open bucket", move |store| {
            let chunks = store.open_stream(&prefix, query.rev)?;
            let count = store.chunk_count(&prefix, chunks.revision())?;
            Ok((chunks, count))
        })
        .await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(REVISION_HEADER, chunks.revision())
        .header(CHUNKS_HEADER, count)
        .body(stream_body(chunks))
        .map_err(|e| ServerError::Internal(e.to_string()))
}

/// Store the request body as a new revision of a bucket.
pub async fn put_bucket_handler(
    State(state): State<AppState>,
    Path((account, bucket)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> ServerResult<(StatusCode, Json<RevisionHandle>)> {
    let prefix = bucket_prefix(&account, &bucket)?;
    state.authorize(&headers, Action::Write { account }).await?;

    let chunk_size = state.store.config().effective_chunk_size();
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let write = state.run_transfer("write bucket", move |store| {
        store.put(&prefix, UploadChunks::new(rx))
    });
    let forward = forward_body(body, chunk_size, state.op_timeout(), tx);
    let (written, forwarded) = tokio::join!(write, forward);

    let handle = match (written, forwarded) {
        (Ok(handle), _) => handle,
        (Err(_), Err(body_error)) => return Err(body_error),
        (Err(e), Ok(())) => return Err(e),
    };
    info!(
        prefix = %handle.prefix,
        revision = handle.revision,
        bytes = handle.bytes,
        "bucket written"
    );
    Ok((StatusCode::CREATED, Json(handle)))
}

/// Remove every revision of a bucket.
pub async fn delete_bucket_handler(
    State(state): State<AppState>,
    Path((account, bucket)): Path<(String, String)>,
    headers: HeaderMap,
) -> ServerResult<StatusCode> {
    let prefix = bucket_prefix(&account, &bucket)?;
    state.authorize(&headers, Action::Write { account }).await?;
    state
        .run_blocking("delete bucket", move |store| store.delete_entry(&prefix))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// JSON listing of a bucket's revisions.
pub async fn revisions_handler(
    State(state): State<AppState>,
    Path((account, bucket)): Path<(String, String)>,
    headers: HeaderMap,
) -> ServerResult<Response> {
    let prefix = bucket_prefix(&account, &bucket)?;
    state.authorize(&headers, Action::Read { account }).await?;

    let listing = state
        .run_blocking("list revisions", move |store| {
            let revisions = store.revisions(&prefix)?;
            let Some(current) = revisions.last().copied() else {
                return Err(StoreError::EntryNotFound(prefix));
            };
            let latest_readable = store.latest_readable(&prefix)?;
            Ok(RevisionsResponse {
                current: i64::from(current),
                prefix,
                revisions,
                latest_readable,
            })
        })
        .await?;

    let mut sink = BucketSink::new();
    serde_json::to_writer(&mut sink, &listing)
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(sink.concat()))
        .map_err(|e| ServerError::Internal(e.to_string()))
}

/// Digest of a stored revision.
pub async fn digest_handler(
    State(state): State<AppState>,
    Path((account, bucket)): Path<(String, String)>,
    Query(query): Query<RevisionQuery>,
    headers: HeaderMap,
) -> ServerResult<Json<DigestResponse>> {
    let prefix = bucket_prefix(&account, &bucket)?;
    state.authorize(&headers, Action::Read { account }).await?;

    let hasher = *state.store.hasher();
    let (prefix, revision, digest) = state
        .run_transfer("digest bucket", move |store| {
            let (revision, digest) = store.digest(&prefix, query.rev)?;
            Ok((prefix, revision, digest))
        })
        .await?;
    Ok(Json(DigestResponse {
        prefix,
        revision,
        algorithm: hasher.algorithm().to_string(),
        encoding: hasher.encoding().to_string(),
        digest,
    }))
}
