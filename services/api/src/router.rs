//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application: the
//! REST API and the WebSocket endpoint.

use crate::{handlers, state::AppState, ws::ws_handler};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/query", post(handlers::post_query))
        .route("/api/history", get(handlers::get_history))
        .route("/api/reset", post(handlers::post_reset))
        .route("/ws", get(ws_handler))
        .with_state(app_state)
}
