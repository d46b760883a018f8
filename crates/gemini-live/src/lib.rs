//! Client for the Gemini Live API (`BidiGenerateContent`).
//!
//! Wraps the bidirectional WebSocket protocol behind a typed session object:
//! `connect` performs the setup handshake, after which the session splits
//! into a send half (audio/text input) and a receive half (a server-paced
//! stream of [`LiveEvent`]s). The session is single-shot: once the event
//! stream ends it cannot be resumed, only reconnected.

mod error;
mod session;
mod types;

pub use error::LiveError;
pub use session::{LiveEvents, LiveSender, LiveSession, connect};
pub use types::{LiveConfig, LiveEvent, UnknownVoice, VoicePreset};
