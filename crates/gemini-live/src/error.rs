/// Errors surfaced by a Gemini Live session.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    /// The WebSocket connection could not be established or dropped mid-session.
    #[error("live transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// The server rejected or never completed the setup handshake.
    #[error("live setup handshake failed: {0}")]
    Handshake(String),

    /// A payload could not be serialized for the wire.
    #[error("live protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// An operation was attempted on a session that is already closed.
    #[error("live session is closed")]
    Closed,
}
