//! HTTP server for kvbucket.
//!
//! Exposes a [`kvb_store::BucketStore`] over HTTP: bucket bodies stream in
//! and out chunk by chunk, every write creates a new revision, and older
//! revisions stay readable with `?rev=N`. Store calls run on the blocking
//! pool; bodies cross over through bounded channels.

pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod state;

pub use auth::{AccountAuth, Action, AllowAllAuth, AuthProvider, Credentials, Identity};
pub use config::{AuthConfig, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use handler::{CHUNKS_HEADER, REVISION_HEADER};
pub use server::{KvbServer, PidFile};
pub use state::AppState;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use kvb_store::{BucketStore, RevisionHandle, StoreConfig};
    use tower::util::ServiceExt;

    fn app_with(config: ServerConfig) -> (AppState, Router) {
        let store = BucketStore::open(StoreConfig {
            chunk_size: 4,
            ..config.store_config()
        })
        .unwrap();
        let state = AppState::new(store, config);
        (state.clone(), router::build_router(state))
    }

    fn app() -> (AppState, Router) {
        app_with(ServerConfig::default())
    }

    async fn send(app: &Router, request: Request<Body>) -> axum::response::Response {
        app.clone().oneshot(request).await.unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
        to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (_, app) = app();
        let response = send(&app, get("/v1/health")).await;
        assert_eq!(response.status(), 200);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn info_endpoint() {
        let (_, app) = app();
        let response = send(&app, get("/v1/info")).await;
        assert_eq!(response.status(), 200);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["name"], "kvb-server");
        assert_eq!(json["hash_algorithm"], "sha256");
    }

    #[tokio::test]
    async fn put_then_get_round_trip() {
        let (state, app) = app();
        let response = send(&app, post("/v1/buckets/acct/photo", "hello, buckets")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let handle: RevisionHandle = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(handle.prefix, "acct/photo");
        assert_eq!(handle.revision, 0);
        assert_eq!(handle.chunks, 4);
        assert_eq!(handle.digest, state.store.hasher().hash_bytes("hello, buckets"));

        let response = send(&app, get("/v1/buckets/acct/photo")).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()[REVISION_HEADER], "0");
        assert_eq!(response.headers()[CHUNKS_HEADER], "4");
        assert_eq!(body_bytes(response).await, "hello, buckets");
    }

    #[tokio::test]
    async fn older_revisions_stay_readable() {
        let (_, app) = app();
        send(&app, post("/v1/buckets/acct/doc", "first")).await;
        let put = Request::builder()
            .method("PUT")
            .uri("/v1/buckets/acct/doc")
            .body(Body::from("second"))
            .unwrap();
        assert_eq!(send(&app, put).await.status(), StatusCode::CREATED);

        let latest = send(&app, get("/v1/buckets/acct/doc")).await;
        assert_eq!(latest.headers()[REVISION_HEADER], "1");
        assert_eq!(body_bytes(latest).await, "second");

        let first = send(&app, get("/v1/buckets/acct/doc?rev=0")).await;
        assert_eq!(body_bytes(first).await, "first");

        let missing = send(&app, get("/v1/buckets/acct/doc?rev=7")).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_body_is_stored() {
        let (_, app) = app();
        let response = send(&app, post("/v1/buckets/acct/empty", Body::empty())).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let response = send(&app, get("/v1/buckets/acct/empty")).await;
        assert_eq!(response.status(), 200);
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn encoded_slash_in_a_segment_is_rejected() {
        let (state, app) = app();
        let response = send(&app, post("/v1/buckets/acct/x%2Fy", "data")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = send(&app, post("/v1/buckets/acct%2Fx/y", "data")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.revisions("acct/x/y").unwrap().is_empty());
    }

    #[tokio::test]
    async fn slow_upload_outlasts_the_operation_timeout() {
        use futures_util::{stream, StreamExt};
        use std::time::Duration;

        let config = ServerConfig {
            store: StoreConfig {
                op_timeout_ms: Some(100),
                ..StoreConfig::default()
            },
            ..ServerConfig::default()
        };
        let (_, app) = app_with(config);
        let body = Body::from_stream(stream::iter(0..8).then(|i| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok::<_, std::io::Error>(bytes::Bytes::from(format!("part{i}")))
        }));
        let response = send(&app, post("/v1/buckets/acct/slow", body)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let handle: RevisionHandle = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(handle.bytes, 40);

        let response = send(&app, get("/v1/buckets/acct/slow")).await;
        assert_eq!(body_bytes(response).await.len(), 40);
    }

    #[tokio::test]
    async fn missing_bucket_is_404() {
        let (_, app) = app();
        let response = send(&app, get("/v1/buckets/acct/ghost")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(json["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn revisions_listing() {
        let (_, app) = app();
        send(&app, post("/v1/buckets/acct/doc", "a")).await;
        send(&app, post("/v1/buckets/acct/doc", "b")).await;
        let response = send(&app, get("/v1/buckets/acct/doc/revisions")).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "application/json");
        let listing: handler::RevisionsResponse =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(listing.revisions, vec![0, 1]);
        assert_eq!(listing.current, 1);
        assert_eq!(listing.latest_readable, Some(1));

        let ghost = send(&app, get("/v1/buckets/acct/ghost/revisions")).await;
        assert_eq!(ghost.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn digest_endpoint() {
        let (state, app) = app();
        send(&app, post("/v1/buckets/acct/doc", "ABCDEF")).await;
        let response = send(&app, get("/v1/buckets/acct/doc/digest?rev=0")).await;
        assert_eq!(response.status(), 200);
        let digest: handler::DigestResponse =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(digest.revision, 0);
        assert_eq!(digest.algorithm, "sha256");
        assert_eq!(digest.digest, state.store.hasher().hash_bytes("ABCDEF"));
    }

    #[tokio::test]
    async fn delete_bucket() {
        let (_, app) = app();
        send(&app, post("/v1/buckets/acct/doc", "a")).await;
        let delete = Request::builder()
            .method("DELETE")
            .uri("/v1/buckets/acct/doc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, delete).await.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            send(&app, get("/v1/buckets/acct/doc")).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn account_id_endpoint() {
        let mut config = ServerConfig::default();
        config.account.secret_salt = "pepper".into();
        let (state, app) = app_with(config);
        let request = Request::builder()
            .method("POST")
            .uri("/v1/account-id")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"email":"a@b.com"}"#))
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(response.status(), 200);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        let id = json["account_id"].as_str().unwrap();
        assert_eq!(id.len(), 12);
        assert_eq!(id, state.deriver.derive("a@b.com"));
    }

    #[tokio::test]
    async fn account_id_rejects_empty_email() {
        let (_, app) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/v1/account-id")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"email":"  "}"#))
            .unwrap();
        assert_eq!(send(&app, request).await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn accounts_only_reach_their_own_buckets() {
        let mut config = ServerConfig::default();
        let digest = kvb_crypto::IntegrityHasher::default().hash_bytes("secret");
        config.auth.accounts.insert("acct".into(), digest);
        let (_, app) = app_with(config);

        let anonymous = send(&app, post("/v1/buckets/acct/doc", "x")).await;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let authed = |uri: &str| {
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("user", "acct")
                .header("password", "secret")
                .body(Body::from("x"))
                .unwrap()
        };
        assert_eq!(send(&app, authed("/v1/buckets/acct/doc")).await.status(), StatusCode::CREATED);
        assert_eq!(send(&app, authed("/v1/buckets/other/doc")).await.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn cors_headers_when_enabled() {
        let config = ServerConfig {
            allow_cors: true,
            ..ServerConfig::default()
        };
        let (_, app) = app_with(config);
        let request = Request::builder()
            .uri("/v1/health")
            .header("origin", "https://example.org")
            .body(Body::empty())
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(response.headers()["access-control-allow-origin"], "*");

        let (_, closed) = self::app();
        let request = Request::builder()
            .uri("/v1/health")
            .header("origin", "https://example.org")
            .body(Body::empty())
            .unwrap();
        let response = send(&closed, request).await;
        assert!(response.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (_, app) = app();
        assert_eq!(send(&app, get("/v1/nope")).await.status(), StatusCode::NOT_FOUND);
    }
}
