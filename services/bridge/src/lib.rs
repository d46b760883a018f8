//! Gemini Live Bridge Library Crate
//!
//! This library contains all the logic for the bridge web service:
//! configuration, application state, the HTTP surface, and the WebSocket
//! relay under `ws/`. The `bridge` binary is a thin wrapper around it.

pub mod config;
pub mod handlers;
pub mod router;
pub mod state;
pub mod ws;
