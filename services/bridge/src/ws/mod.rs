//! WebSocket Relay
//!
//! The core of the service: one relay session per accepted connection,
//! pairing the client socket with one Gemini Live session. Submodules:
//!
//! - `protocol`: the JSON frame format spoken with the browser client.
//! - `relay`: the duplex forwarding core and its teardown logic.
//! - `session`: axum upgrade handling and the adapters binding the relay
//!   to the real sockets.

pub mod protocol;
pub mod relay;
pub mod session;

pub use session::ws_handler;
