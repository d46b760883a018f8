//! Defines the WebSocket message protocol between the browser client and the
//! bridge. Audio travels as raw binary frames in both directions; everything
//! else is a small tagged JSON object.

use serde::{Deserialize, Serialize};

/// Normal closure after a clean disconnect from either side.
pub const CLOSE_NORMAL: u16 = 1000;
/// Abnormal closure after an internal or upstream failure.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Control messages sent from the client as text frames.
///
/// Only `text_input` is recognized; any other shape fails to parse and is
/// silently discarded by the relay.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Out-of-band text input that ends the current user turn.
    TextInput { content: String },
}

/// Structured frames sent from the bridge to the client as text.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Transcript or model text.
    Text { content: String },
    /// The model finished its response turn.
    TurnComplete,
    /// The user barged in while the model was speaking; consumers should
    /// flush their playback buffers.
    Interrupted,
    /// Fatal relay failure, delivered best-effort before closing.
    Error { message: String },
}

impl ServerFrame {
    pub fn to_json(&self) -> String {
        // The enum has no unserializable shapes.
        serde_json::to_string(self).unwrap_or_default()
    }
}
