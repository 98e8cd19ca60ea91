use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use shared_config::AppConfig;

use crate::handlers;

pub fn availability_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/candidates", post(handlers::generate_candidates))
        .route("/slots", post(handlers::compute_slots))
        .with_state(state)
}
