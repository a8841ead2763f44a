use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;

use crate::handlers;
use crate::middleware::timing;
use crate::AppState;

/// Builds the full Axum `Router` with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Updates ─────────────────────────────────────────────
        .route(
            "/update/:kind/:name/:value",
            post(handlers::update::update_from_path),
        )
        .route("/update/", post(handlers::update::update_from_json))
        .route("/updates/", post(handlers::update::update_batch))
        // ── Lookups ─────────────────────────────────────────────
        .route("/value/:kind/:name", get(handlers::value::value_as_text))
        .route("/value/", post(handlers::value::value_as_json))
        // ── Listing & health ────────────────────────────────────
        .route("/", get(handlers::listing::list_metrics))
        .route("/ping", get(handlers::listing::ping))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CompressionLayer::new())
        .layer(RequestDecompressionLayer::new())
}
