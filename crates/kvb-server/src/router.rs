use axum::http::{HeaderName, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handler;
use crate::state::AppState;

/// Build the axum router with all kvbucket endpoints.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route("/v1/info", get(handler::info_handler))
        .route("/v1/account-id", post(handler::account_id_handler))
        .route(
            "/v1/buckets/:account/:bucket",
            get(handler::get_bucket_handler)
                .post(handler::put_bucket_handler)
                .put(handler::put_bucket_handler)
                .delete(handler::delete_bucket_handler),
        )
        .route(
            "/v1/buckets/:account/:bucket/revisions",
            get(handler::revisions_handler),
        )
        .route(
            "/v1/buckets/:account/:bucket/digest",
            get(handler::digest_handler),
        )
        .layer(TraceLayer::new_for_http());

    let router = if state.config.allow_cors {
        router.layer(cors_layer())
    } else {
        router
    };
    router.with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(handler::REVISION_HEADER),
            HeaderName::from_static(handler::CHUNKS_HEADER),
        ])
}
