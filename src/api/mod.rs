//! Health surface.

pub mod routes;

use crate::scheduler::AppState;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
