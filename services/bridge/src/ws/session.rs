//! Manages the WebSocket connection lifecycle for one relay session, and
//! the adapters binding the real transports to the relay's seam traits.

use super::{
    protocol::CLOSE_INTERNAL_ERROR,
    relay::{
        ClientInput, ClientSink, ClientStream, RelayError, RelayPolicy, RelaySession,
        UpstreamSink, UpstreamStream,
    },
};
use crate::state::AppState;
use async_trait::async_trait;
use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use gemini_live::{LiveConfig, LiveError, LiveEvent, LiveEvents, LiveSender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Opens the upstream session for one relay. The session glue only needs
/// the two upstream halves back, so the connect step sits behind this seam
/// and the failure branches can be driven without a live credential.
#[async_trait]
trait UpstreamConnector: Send + Sync + 'static {
    type Sink: UpstreamSink + 'static;
    type Stream: UpstreamStream + 'static;

    async fn connect(&self) -> Result<(Self::Sink, Self::Stream), LiveError>;
}

struct GeminiConnector {
    config: LiveConfig,
}

#[async_trait]
impl UpstreamConnector for GeminiConnector {
    type Sink = LiveUpstreamSink;
    type Stream = LiveUpstreamStream;

    async fn connect(&self) -> Result<(Self::Sink, Self::Stream), LiveError> {
        let live = gemini_live::connect(&self.config).await?;
        let (live_tx, live_rx) = live.split();
        Ok((LiveUpstreamSink(live_tx), LiveUpstreamStream(live_rx)))
    }
}

/// Entry point for one accepted connection.
#[instrument(name = "relay_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id: u32 = rand::random();
    tracing::Span::current().record("session_id", &session_id.to_string());
    info!("client connected, opening upstream session");

    let connector = GeminiConnector {
        config: LiveConfig {
            api_key: state.config.gemini_api_key.clone(),
            model: state.config.live_model.clone(),
            voice: state.config.voice,
        },
    };
    run_session(
        socket,
        state.config.upstream_connect_timeout,
        RelayPolicy {
            forward_interruptions: state.config.forward_interruptions,
        },
        connector,
    )
    .await;
}

/// Opens the upstream session under the deadline and hands both sockets to
/// the relay. If the connect fails or times out, the client is closed with
/// an abnormal code and no forwarding loop ever starts.
async fn run_session<C: UpstreamConnector>(
    mut socket: WebSocket,
    connect_timeout: Duration,
    policy: RelayPolicy,
    connector: C,
) {
    let connect = tokio::time::timeout(connect_timeout, connector.connect());
    let (upstream_tx, upstream_rx) = match connect.await {
        Ok(Ok(halves)) => halves,
        Ok(Err(e)) => {
            error!(error = %e, "upstream connect failed");
            close_abnormal(&mut socket, "upstream connect failed").await;
            return;
        }
        Err(_) => {
            error!("upstream connect timed out");
            close_abnormal(&mut socket, "upstream connect timed out").await;
            return;
        }
    };

    let (socket_tx, socket_rx) = socket.split();
    let mut relay = RelaySession::new(
        WsClientStream(socket_rx),
        WsClientSink {
            sink: socket_tx,
            closed: false,
        },
        upstream_tx,
        upstream_rx,
        policy,
    );

    let end = relay.run().await;
    info!(?end, "relay session finished");
}

async fn close_abnormal(socket: &mut WebSocket, reason: &str) {
    let frame = CloseFrame {
        code: CLOSE_INTERNAL_ERROR,
        reason: reason.to_string().into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "client close frame not delivered");
    }
}

// --- Adapters -------------------------------------------------------------

struct WsClientStream(SplitStream<WebSocket>);

#[async_trait]
impl ClientStream for WsClientStream {
    async fn next_input(&mut self) -> Result<ClientInput, RelayError> {
        loop {
            return match self.0.next().await {
                Some(Ok(Message::Binary(pcm))) => Ok(ClientInput::Audio(pcm)),
                Some(Ok(Message::Text(text))) => Ok(ClientInput::Text(text.to_string())),
                Some(Ok(Message::Close(_))) | None => Ok(ClientInput::Disconnected),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Err(e)) => Err(RelayError::ClientTransport(e.to_string())),
            };
        }
    }
}

struct WsClientSink {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl ClientSink for WsClientSink {
    async fn send_binary(&mut self, bytes: Bytes) -> Result<(), RelayError> {
        self.sink
            .send(Message::Binary(bytes))
            .await
            .map_err(|e| RelayError::ClientTransport(e.to_string()))
    }

    async fn send_text(&mut self, text: String) -> Result<(), RelayError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| RelayError::ClientTransport(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
            debug!(error = %e, "client close frame not delivered");
        }
    }
}

struct LiveUpstreamSink(LiveSender);

#[async_trait]
impl UpstreamSink for LiveUpstreamSink {
    async fn send_audio(&mut self, pcm: Bytes, end_of_turn: bool) -> Result<(), RelayError> {
        Ok(self.0.send_audio(&pcm, end_of_turn).await?)
    }

    async fn send_text(&mut self, text: String, end_of_turn: bool) -> Result<(), RelayError> {
        Ok(self.0.send_text(&text, end_of_turn).await?)
    }

    async fn close(&mut self) {
        self.0.close().await;
    }
}

struct LiveUpstreamStream(LiveEvents);

#[async_trait]
impl UpstreamStream for LiveUpstreamStream {
    async fn next_event(&mut self) -> Result<Option<LiveEvent>, RelayError> {
        self.0.next().await.map_err(RelayError::Upstream)
    }
}
