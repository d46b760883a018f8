//! Axum handlers for the plain HTTP surface. Only a liveness probe lives
//! here; everything real goes over the WebSocket.

use crate::state::AppState;
use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
    pub voice: &'static str,
}

/// Reports service liveness and the configured upstream identifiers.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: state.config.live_model.clone(),
        voice: state.config.voice.as_str(),
    })
}
