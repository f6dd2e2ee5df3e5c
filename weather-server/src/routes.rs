//! Route definitions

use axum::{
    Router,
    routing::{delete, get},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{handlers, state::AppState};

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    let weather = Router::new()
        .route("/current", get(handlers::current))
        .route("/forecast", get(handlers::forecast))
        .route("/city/{city_name}", get(handlers::by_city))
        .route("/zip/{zip_code}", get(handlers::by_zip))
        // Cache management
        .route("/cache/stats", get(handlers::cache_stats))
        .route("/cache", delete(handlers::clear_cache));

    Router::new()
        .route("/", get(handlers::api_info))
        .nest("/api/weather", weather)
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
