//! REST API Routes Module
//!
//! Route assembly for the read surface:
//! - `/api/order/:id` served from the read cache
//! - `/health/*` liveness and readiness checks
//! - optional static assets for every other path

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::state::AppState;

pub mod health;
pub mod order;

/// Create the complete API router.
pub fn create_api_router(state: AppState, config: &ServerConfig) -> Router {
    let mut router = Router::new()
        .route("/api/order/:id", get(order::get_order))
        .nest("/health", health::create_router());

    if let Some(dir) = &config.web_dir {
        tracing::info!(web_dir = %dir.display(), "Serving static assets");
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(config))
        .with_state(state)
}

/// Build the CORS layer. Read-only surface, so only GET and preflight.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}
