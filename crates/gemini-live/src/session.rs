//! Session lifecycle: connect/handshake, the send half, and the event stream.

use crate::error::LiveError;
use crate::types::{self, ClientMessage, LiveConfig, LiveEvent};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::collections::VecDeque;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, info};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// One open Live session, produced by [`connect`].
pub struct LiveSession {
    sender: LiveSender,
    events: LiveEvents,
}

impl LiveSession {
    /// Splits the session into its single-writer and single-reader halves.
    pub fn split(self) -> (LiveSender, LiveEvents) {
        (self.sender, self.events)
    }
}

/// Opens a session and completes the setup handshake.
///
/// Returns only once the server has acknowledged the declared configuration
/// with `setupComplete`; anything else during setup is a handshake failure.
/// No retries happen here.
pub async fn connect(config: &LiveConfig) -> Result<LiveSession, LiveError> {
    let url = format!("{LIVE_ENDPOINT}?key={}", config.api_key);
    let (ws_stream, _) = connect_async(url).await?;
    debug!("connected to Gemini Live WebSocket, sending setup");
    let (mut tx, mut rx) = ws_stream.split();

    let setup = serde_json::to_string(&ClientMessage::setup(config))?;
    tx.send(WsMessage::Text(setup.into())).await?;

    loop {
        let raw = match rx.next().await {
            Some(Ok(WsMessage::Text(text))) => text.as_bytes().to_vec(),
            Some(Ok(WsMessage::Binary(raw))) => raw.to_vec(),
            Some(Ok(WsMessage::Close(frame))) => {
                return Err(LiveError::Handshake(format!(
                    "server closed during setup: {frame:?}"
                )));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(LiveError::Handshake(
                    "connection ended before setup completed".into(),
                ));
            }
        };
        let msg: types::ServerMessage = serde_json::from_slice(&raw)
            .map_err(|e| LiveError::Handshake(format!("unparseable frame during setup: {e}")))?;
        if msg.setup_complete.is_some() {
            break;
        }
        return Err(LiveError::Handshake(
            "unexpected message before setupComplete".into(),
        ));
    }

    info!(model = %config.model, voice = config.voice.as_str(), "live session setup complete");
    Ok(LiveSession {
        sender: LiveSender { tx, closed: false },
        events: LiveEvents {
            rx,
            pending: VecDeque::new(),
        },
    })
}

/// The write half of a session. Exactly one task should own this.
pub struct LiveSender {
    tx: SplitSink<WsStream, WsMessage>,
    closed: bool,
}

impl LiveSender {
    async fn send_msg(&mut self, msg: &ClientMessage) -> Result<(), LiveError> {
        if self.closed {
            return Err(LiveError::Closed);
        }
        let payload = serde_json::to_string(msg)?;
        self.tx.send(WsMessage::Text(payload.into())).await?;
        Ok(())
    }

    /// Streams one chunk of raw PCM16 input audio.
    ///
    /// With `end_of_turn` false the server's own voice-activity detection
    /// decides the turn boundary; with it true an empty `clientContent`
    /// closing the turn follows the chunk.
    pub async fn send_audio(&mut self, pcm: &[u8], end_of_turn: bool) -> Result<(), LiveError> {
        self.send_msg(&ClientMessage::audio_chunk(pcm)).await?;
        if end_of_turn {
            self.send_msg(&ClientMessage::end_of_turn()).await?;
        }
        Ok(())
    }

    /// Streams a user text turn.
    pub async fn send_text(&mut self, text: &str, end_of_turn: bool) -> Result<(), LiveError> {
        self.send_msg(&ClientMessage::user_turn(text.to_string(), end_of_turn))
            .await
    }

    /// Closes the session. Idempotent and infallible; safe on the error path
    /// where the peer may already be gone.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.tx.send(WsMessage::Close(None)).await {
            debug!(error = %e, "live close frame not delivered");
        }
    }
}

/// The server-paced event stream of a session.
///
/// One wire frame can carry several events (audio parts, a transcript and a
/// turn boundary together); they are queued and handed out one at a time in
/// arrival order. `Ok(None)` means the session ended; the stream cannot be
/// restarted.
pub struct LiveEvents {
    rx: SplitStream<WsStream>,
    pending: VecDeque<LiveEvent>,
}

impl LiveEvents {
    pub async fn next(&mut self) -> Result<Option<LiveEvent>, LiveError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            match self.rx.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    self.pending
                        .extend(types::parse_server_payload(text.as_bytes()));
                }
                Some(Ok(WsMessage::Binary(raw))) => {
                    self.pending.extend(types::parse_server_payload(&raw));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(?frame, "live session closed by server");
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }
}
