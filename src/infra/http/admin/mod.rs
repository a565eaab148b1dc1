mod cache;
mod health;
mod state;

pub use state::AdminState;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use super::middleware::{log_responses, set_request_context};

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/cache/clear", post(cache::clear_cache))
        .route("/cache/invalidate", post(cache::invalidate_urls))
        .route("/cache/events", post(cache::content_event))
        .route("/cache/stats", get(cache::cache_stats))
        .route("/cache/health", get(health::cache_health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}
