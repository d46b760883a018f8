//! Axum Router Configuration
//!
//! Defines the complete HTTP routing for the service: the health probe and
//! the WebSocket relay endpoint.

use crate::{handlers, state::AppState, ws::ws_handler};
use axum::{Router, routing::get};
use std::sync::Arc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(ws_handler))
        .with_state(app_state)
}
