//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use sieve_core::config::ServerConfig;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Room for multipart boundaries and the metadata fields around a chunk.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Body limit for chunk uploads.
pub fn chunk_body_limit(config: &ServerConfig) -> usize {
    usize::try_from(config.max_chunk_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD)
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/files/capabilities", get(handlers::get_capabilities))
        .route(
            "/api/files/chunks",
            post(handlers::upload_chunk)
                .layer(DefaultBodyLimit::max(chunk_body_limit(&state.config.server))),
        )
        .route("/api/files/uploads/{upload_id}", get(handlers::get_upload))
        .route("/api/files/process", post(handlers::process_upload))
        .route(
            "/api/files/download/{archive_name}",
            get(handlers::download_archive),
        );

    let mut router = Router::new().merge(api_routes);

    // The metrics endpoint is unauthenticated; restrict it at the network edge.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    if state.config.server.cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
