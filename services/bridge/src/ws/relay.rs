//! The duplex relay core: two forwarding loops racing over one client
//! socket and one upstream Live session.
//!
//! Everything here is written against the four seam traits below so the
//! loops can be exercised with scripted transports. The real adapters live
//! in `session.rs`. Single-writer rule: only the upstream-bound loop writes
//! to the Live session, only the downstream-bound loop writes to the client
//! socket, so neither handle needs a lock.

use super::protocol::{CLOSE_INTERNAL_ERROR, CLOSE_NORMAL, ControlMessage, ServerFrame};
use async_trait::async_trait;
use bytes::Bytes;
use gemini_live::{LiveError, LiveEvent};
use tracing::{debug, error, info};

/// Errors surfaced by a relay session's transports.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("upstream session failed: {0}")]
    Upstream(#[from] LiveError),
    #[error("client transport error: {0}")]
    ClientTransport(String),
}

/// One received item from the client socket's read half.
#[derive(Debug)]
pub enum ClientInput {
    /// A binary frame of raw PCM16 microphone audio.
    Audio(Bytes),
    /// A text frame, expected (but not required) to be a control message.
    Text(String),
    /// The peer closed the connection. A terminal signal, not an error.
    Disconnected,
}

/// Read half of the client socket.
#[async_trait]
pub trait ClientStream: Send {
    async fn next_input(&mut self) -> Result<ClientInput, RelayError>;
}

/// Write half of the client socket. `close` must be idempotent and must
/// never fail, since the peer may already be gone on the teardown path.
#[async_trait]
pub trait ClientSink: Send {
    async fn send_binary(&mut self, bytes: Bytes) -> Result<(), RelayError>;
    async fn send_text(&mut self, text: String) -> Result<(), RelayError>;
    async fn close(&mut self, code: u16, reason: &str);
}

/// Write half of the upstream session. Same idempotent-close contract.
#[async_trait]
pub trait UpstreamSink: Send {
    async fn send_audio(&mut self, pcm: Bytes, end_of_turn: bool) -> Result<(), RelayError>;
    async fn send_text(&mut self, text: String, end_of_turn: bool) -> Result<(), RelayError>;
    async fn close(&mut self);
}

/// Read half of the upstream session. `Ok(None)` is a clean session end.
#[async_trait]
pub trait UpstreamStream: Send {
    async fn next_event(&mut self) -> Result<Option<LiveEvent>, RelayError>;
}

/// Why a forwarding loop stopped.
#[derive(Debug)]
pub enum LoopEnd {
    /// The client hung up. Expected, not an error.
    ClientDisconnected,
    /// The upstream event stream ended cleanly.
    UpstreamClosed,
    /// The client socket failed mid-session.
    ClientTransport(RelayError),
    /// The upstream session failed mid-session, on either half: a write
    /// into it was rejected or its event stream broke.
    Upstream(RelayError),
}

impl LoopEnd {
    fn error(&self) -> Option<&RelayError> {
        match self {
            LoopEnd::ClientDisconnected | LoopEnd::UpstreamClosed => None,
            LoopEnd::ClientTransport(e) | LoopEnd::Upstream(e) => Some(e),
        }
    }
}

/// Lifecycle of one relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Per-session behavior knobs, copied out of the process config.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayPolicy {
    pub forward_interruptions: bool,
}

/// One client/upstream pairing. Owns all four transport halves for the
/// session's lifetime; dropped only after both loops have exited and
/// teardown ran.
pub struct RelaySession<CR, CS, UT, UR> {
    client_rx: CR,
    client_tx: CS,
    upstream_tx: UT,
    upstream_rx: UR,
    policy: RelayPolicy,
    state: SessionState,
}

impl<CR, CS, UT, UR> RelaySession<CR, CS, UT, UR>
where
    CR: ClientStream,
    CS: ClientSink,
    UT: UpstreamSink,
    UR: UpstreamStream,
{
    pub fn new(
        client_rx: CR,
        client_tx: CS,
        upstream_tx: UT,
        upstream_rx: UR,
        policy: RelayPolicy,
    ) -> Self {
        Self {
            client_rx,
            client_tx,
            upstream_tx,
            upstream_rx,
            policy,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs both forwarding loops until the first one completes, then tears
    /// the whole session down. A half-open relay (one direction dead, the
    /// other still forwarding) silently loses data, so first completion
    /// cancels the other loop's pending await by drop.
    pub async fn run(&mut self) -> LoopEnd {
        self.state = SessionState::Active;
        let end = tokio::select! {
            end = upstream_loop(&mut self.client_rx, &mut self.upstream_tx) => end,
            end = downstream_loop(&mut self.upstream_rx, &mut self.client_tx, self.policy) => end,
        };
        self.shutdown(&end).await;
        end
    }

    /// Closes both sides. Idempotent: the lifecycle state guards against a
    /// second invocation from another teardown path double-releasing.
    pub async fn shutdown(&mut self, end: &LoopEnd) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        self.state = SessionState::Closing;

        self.upstream_tx.close().await;

        match end.error() {
            None => {
                self.client_tx.close(CLOSE_NORMAL, "session ended").await;
                info!(?end, "relay session closed");
            }
            Some(err) => {
                // Best-effort diagnostics; the socket may already be gone.
                let frame = ServerFrame::Error {
                    message: err.to_string(),
                };
                if self.client_tx.send_text(frame.to_json()).await.is_err() {
                    debug!("client unreachable for final error frame");
                }
                self.client_tx
                    .close(CLOSE_INTERNAL_ERROR, "relay failure")
                    .await;
                error!(error = %err, "relay session closed after failure");
            }
        }

        self.state = SessionState::Closed;
    }
}

/// Client -> upstream: audio passes through byte-for-byte and never ends
/// the turn (upstream VAD finds the boundaries); text frames are parsed as
/// control messages and anything unrecognized is dropped without killing
/// the loop.
async fn upstream_loop<CR, UT>(client: &mut CR, upstream: &mut UT) -> LoopEnd
where
    CR: ClientStream,
    UT: UpstreamSink,
{
    loop {
        match client.next_input().await {
            Ok(ClientInput::Audio(pcm)) => {
                if let Err(e) = upstream.send_audio(pcm, false).await {
                    error!(error = %e, "failed to forward audio upstream");
                    return LoopEnd::Upstream(e);
                }
            }
            Ok(ClientInput::Text(text)) => match serde_json::from_str::<ControlMessage>(&text) {
                Ok(ControlMessage::TextInput { content }) => {
                    if let Err(e) = upstream.send_text(content, true).await {
                        error!(error = %e, "failed to forward text input upstream");
                        return LoopEnd::Upstream(e);
                    }
                }
                Err(_) => {
                    debug!("ignoring unrecognized client control frame");
                }
            },
            Ok(ClientInput::Disconnected) => {
                info!("client disconnected");
                return LoopEnd::ClientDisconnected;
            }
            Err(e) => {
                error!(error = %e, "client receive failed");
                return LoopEnd::ClientTransport(e);
            }
        }
    }
}

/// Upstream -> client: one client frame per event, audio chunk boundaries
/// preserved exactly as the producer emitted them.
async fn downstream_loop<UR, CS>(upstream: &mut UR, client: &mut CS, policy: RelayPolicy) -> LoopEnd
where
    UR: UpstreamStream,
    CS: ClientSink,
{
    loop {
        let sent = match upstream.next_event().await {
            Ok(Some(LiveEvent::Audio(pcm))) => client.send_binary(Bytes::from(pcm)).await,
            Ok(Some(LiveEvent::Transcript(content))) => {
                client.send_text(ServerFrame::Text { content }.to_json()).await
            }
            Ok(Some(LiveEvent::TurnComplete)) => {
                client.send_text(ServerFrame::TurnComplete.to_json()).await
            }
            Ok(Some(LiveEvent::Interrupted)) => {
                info!("model output interrupted by user speech");
                if policy.forward_interruptions {
                    client.send_text(ServerFrame::Interrupted.to_json()).await
                } else {
                    Ok(())
                }
            }
            Ok(None) => {
                info!("upstream event stream ended");
                return LoopEnd::UpstreamClosed;
            }
            Err(e) => {
                error!(error = %e, "upstream receive failed");
                return LoopEnd::Upstream(e);
            }
        };
        if let Err(e) = sent {
            error!(error = %e, "failed to forward event to client");
            return LoopEnd::ClientTransport(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };
    use std::time::Duration;

    /// Feeds a fixed script of client inputs, then parks forever.
    struct ScriptedClient {
        script: VecDeque<Result<ClientInput, RelayError>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<ClientInput, RelayError>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    #[async_trait]
    impl ClientStream for ScriptedClient {
        async fn next_input(&mut self) -> Result<ClientInput, RelayError> {
            // Yield so the two loops interleave the way real sockets do.
            tokio::task::yield_now().await;
            match self.script.pop_front() {
                Some(input) => input,
                None => std::future::pending().await,
            }
        }
    }

    #[derive(Debug, PartialEq)]
    enum SentFrame {
        Binary(Vec<u8>),
        Text(String),
    }

    #[derive(Clone, Default)]
    struct RecordingClientSink {
        frames: Arc<Mutex<Vec<SentFrame>>>,
        closes: Arc<Mutex<Vec<(u16, String)>>>,
    }

    #[async_trait]
    impl ClientSink for RecordingClientSink {
        async fn send_binary(&mut self, bytes: Bytes) -> Result<(), RelayError> {
            self.frames
                .lock()
                .unwrap()
                .push(SentFrame::Binary(bytes.to_vec()));
            Ok(())
        }
        async fn send_text(&mut self, text: String) -> Result<(), RelayError> {
            self.frames.lock().unwrap().push(SentFrame::Text(text));
            Ok(())
        }
        async fn close(&mut self, code: u16, reason: &str) {
            self.closes
                .lock()
                .unwrap()
                .push((code, reason.to_string()));
        }
    }

    #[derive(Debug, PartialEq)]
    enum UpstreamSent {
        Audio(Vec<u8>, bool),
        Text(String, bool),
    }

    #[derive(Clone, Default)]
    struct RecordingUpstreamSink {
        sent: Arc<Mutex<Vec<UpstreamSent>>>,
        closes: Arc<AtomicUsize>,
        fail_sends: Arc<AtomicBool>,
    }

    #[async_trait]
    impl UpstreamSink for RecordingUpstreamSink {
        async fn send_audio(&mut self, pcm: Bytes, end_of_turn: bool) -> Result<(), RelayError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(RelayError::Upstream(LiveError::Closed));
            }
            self.sent
                .lock()
                .unwrap()
                .push(UpstreamSent::Audio(pcm.to_vec(), end_of_turn));
            Ok(())
        }
        async fn send_text(&mut self, text: String, end_of_turn: bool) -> Result<(), RelayError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(RelayError::Upstream(LiveError::Closed));
            }
            self.sent
                .lock()
                .unwrap()
                .push(UpstreamSent::Text(text, end_of_turn));
            Ok(())
        }
        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Yields a fixed script of upstream events, then parks forever.
    struct ScriptedUpstream {
        script: VecDeque<Result<Option<LiveEvent>, RelayError>>,
    }

    impl ScriptedUpstream {
        fn new(script: Vec<Result<Option<LiveEvent>, RelayError>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    #[async_trait]
    impl UpstreamStream for ScriptedUpstream {
        async fn next_event(&mut self) -> Result<Option<LiveEvent>, RelayError> {
            tokio::task::yield_now().await;
            match self.script.pop_front() {
                Some(event) => event,
                None => std::future::pending().await,
            }
        }
    }

    fn session(
        client_script: Vec<Result<ClientInput, RelayError>>,
        upstream_script: Vec<Result<Option<LiveEvent>, RelayError>>,
        policy: RelayPolicy,
    ) -> (
        RelaySession<ScriptedClient, RecordingClientSink, RecordingUpstreamSink, ScriptedUpstream>,
        RecordingClientSink,
        RecordingUpstreamSink,
    ) {
        let client_tx = RecordingClientSink::default();
        let upstream_tx = RecordingUpstreamSink::default();
        let relay = RelaySession::new(
            ScriptedClient::new(client_script),
            client_tx.clone(),
            upstream_tx.clone(),
            ScriptedUpstream::new(upstream_script),
            policy,
        );
        (relay, client_tx, upstream_tx)
    }

    async fn run_bounded(
        relay: &mut RelaySession<
            ScriptedClient,
            RecordingClientSink,
            RecordingUpstreamSink,
            ScriptedUpstream,
        >,
    ) -> LoopEnd {
        tokio::time::timeout(Duration::from_secs(1), relay.run())
            .await
            .expect("relay must tear down within the cleanup interval")
    }

    #[tokio::test]
    async fn binary_frames_forward_in_order_without_ending_turn() {
        let (mut relay, _client_tx, upstream_tx) = session(
            vec![
                Ok(ClientInput::Audio(Bytes::from_static(b"one"))),
                Ok(ClientInput::Audio(Bytes::from_static(b"two"))),
                Ok(ClientInput::Disconnected),
            ],
            vec![],
            RelayPolicy::default(),
        );

        let end = run_bounded(&mut relay).await;

        assert!(matches!(end, LoopEnd::ClientDisconnected));
        assert_eq!(
            *upstream_tx.sent.lock().unwrap(),
            vec![
                UpstreamSent::Audio(b"one".to_vec(), false),
                UpstreamSent::Audio(b"two".to_vec(), false),
            ]
        );
    }

    #[tokio::test]
    async fn malformed_control_frames_are_discarded_silently() {
        let (mut relay, _client_tx, upstream_tx) = session(
            vec![
                Ok(ClientInput::Text("not json".into())),
                Ok(ClientInput::Text(r#"{"type":"unknown","x":1}"#.into())),
                Ok(ClientInput::Text(
                    r#"{"type":"text_input","content":"hello"}"#.into(),
                )),
                Ok(ClientInput::Disconnected),
            ],
            vec![],
            RelayPolicy::default(),
        );

        let end = run_bounded(&mut relay).await;

        assert!(matches!(end, LoopEnd::ClientDisconnected));
        assert_eq!(
            *upstream_tx.sent.lock().unwrap(),
            vec![UpstreamSent::Text("hello".into(), true)]
        );
    }

    #[tokio::test]
    async fn audio_events_forward_one_binary_frame_per_event() {
        let (mut relay, client_tx, _upstream_tx) = session(
            vec![],
            vec![
                Ok(Some(LiveEvent::Audio(vec![1, 2, 3]))),
                Ok(Some(LiveEvent::Audio(vec![4]))),
                Ok(None),
            ],
            RelayPolicy::default(),
        );

        let end = run_bounded(&mut relay).await;

        assert!(matches!(end, LoopEnd::UpstreamClosed));
        assert_eq!(
            *client_tx.frames.lock().unwrap(),
            vec![
                SentFrame::Binary(vec![1, 2, 3]),
                SentFrame::Binary(vec![4]),
            ]
        );
        assert_eq!(
            *client_tx.closes.lock().unwrap(),
            vec![(CLOSE_NORMAL, "session ended".to_string())]
        );
    }

    #[tokio::test]
    async fn turn_complete_yields_exactly_one_frame() {
        let (mut relay, client_tx, _upstream_tx) = session(
            vec![],
            vec![Ok(Some(LiveEvent::TurnComplete)), Ok(None)],
            RelayPolicy::default(),
        );

        run_bounded(&mut relay).await;

        assert_eq!(
            *client_tx.frames.lock().unwrap(),
            vec![SentFrame::Text(r#"{"type":"turn_complete"}"#.into())]
        );
    }

    #[tokio::test]
    async fn transcripts_forward_as_text_frames() {
        let (mut relay, client_tx, _upstream_tx) = session(
            vec![],
            vec![Ok(Some(LiveEvent::Transcript("hi there".into()))), Ok(None)],
            RelayPolicy::default(),
        );

        run_bounded(&mut relay).await;

        assert_eq!(
            *client_tx.frames.lock().unwrap(),
            vec![SentFrame::Text(
                r#"{"type":"text","content":"hi there"}"#.into()
            )]
        );
    }

    #[tokio::test]
    async fn interruptions_are_swallowed_by_default() {
        let (mut relay, client_tx, _upstream_tx) = session(
            vec![],
            vec![Ok(Some(LiveEvent::Interrupted)), Ok(None)],
            RelayPolicy::default(),
        );

        run_bounded(&mut relay).await;

        assert!(client_tx.frames.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn interruptions_forward_when_policy_enables_them() {
        let (mut relay, client_tx, _upstream_tx) = session(
            vec![],
            vec![Ok(Some(LiveEvent::Interrupted)), Ok(None)],
            RelayPolicy {
                forward_interruptions: true,
            },
        );

        run_bounded(&mut relay).await;

        assert_eq!(
            *client_tx.frames.lock().unwrap(),
            vec![SentFrame::Text(r#"{"type":"interrupted"}"#.into())]
        );
    }

    #[tokio::test]
    async fn client_disconnect_closes_upstream_session() {
        // The downstream loop is parked on a pending upstream event; the
        // disconnect must still cancel it and release the upstream session.
        let (mut relay, client_tx, upstream_tx) = session(
            vec![Ok(ClientInput::Disconnected)],
            vec![],
            RelayPolicy::default(),
        );

        let end = run_bounded(&mut relay).await;

        assert!(matches!(end, LoopEnd::ClientDisconnected));
        assert_eq!(relay.state(), SessionState::Closed);
        assert_eq!(upstream_tx.closes.load(Ordering::SeqCst), 1);
        assert_eq!(client_tx.closes.lock().unwrap()[0].0, CLOSE_NORMAL);
    }

    #[tokio::test]
    async fn upstream_failure_sends_error_frame_and_abnormal_close() {
        let (mut relay, client_tx, upstream_tx) = session(
            vec![],
            vec![Err(RelayError::Upstream(LiveError::Closed))],
            RelayPolicy::default(),
        );

        let end = run_bounded(&mut relay).await;

        assert!(matches!(end, LoopEnd::Upstream(_)));
        assert_eq!(upstream_tx.closes.load(Ordering::SeqCst), 1);

        let frames = client_tx.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            SentFrame::Text(json) => assert!(json.contains(r#""type":"error""#)),
            other => panic!("expected error frame, got {other:?}"),
        }
        assert_eq!(
            *client_tx.closes.lock().unwrap(),
            vec![(CLOSE_INTERNAL_ERROR, "relay failure".to_string())]
        );
    }

    #[tokio::test]
    async fn rejected_upstream_write_ends_session_as_upstream_failure() {
        let (mut relay, client_tx, upstream_tx) = session(
            vec![
                Ok(ClientInput::Audio(Bytes::from_static(b"mic"))),
                Ok(ClientInput::Disconnected),
            ],
            vec![],
            RelayPolicy::default(),
        );
        upstream_tx.fail_sends.store(true, Ordering::SeqCst);

        let end = run_bounded(&mut relay).await;

        assert!(matches!(end, LoopEnd::Upstream(_)));
        assert!(upstream_tx.sent.lock().unwrap().is_empty());
        assert_eq!(client_tx.closes.lock().unwrap()[0].0, CLOSE_INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn client_transport_error_triggers_abnormal_close() {
        let (mut relay, client_tx, _upstream_tx) = session(
            vec![Err(RelayError::ClientTransport("reset by peer".into()))],
            vec![],
            RelayPolicy::default(),
        );

        let end = run_bounded(&mut relay).await;

        assert!(matches!(end, LoopEnd::ClientTransport(_)));
        assert_eq!(client_tx.closes.lock().unwrap()[0].0, CLOSE_INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (mut relay, client_tx, upstream_tx) = session(
            vec![Ok(ClientInput::Disconnected)],
            vec![],
            RelayPolicy::default(),
        );

        let end = run_bounded(&mut relay).await;
        relay.shutdown(&end).await;
        relay.shutdown(&end).await;

        assert_eq!(relay.state(), SessionState::Closed);
        assert_eq!(upstream_tx.closes.load(Ordering::SeqCst), 1);
        assert_eq!(client_tx.closes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn full_duplex_scripts_interleave_without_reordering_within_a_direction() {
        let (mut relay, client_tx, upstream_tx) = session(
            vec![
                Ok(ClientInput::Audio(Bytes::from_static(b"mic-1"))),
                Ok(ClientInput::Audio(Bytes::from_static(b"mic-2"))),
                Ok(ClientInput::Disconnected),
            ],
            vec![
                Ok(Some(LiveEvent::Audio(vec![9]))),
                Ok(Some(LiveEvent::TurnComplete)),
            ],
            RelayPolicy::default(),
        );

        run_bounded(&mut relay).await;

        // Per-direction order holds even though the directions interleave.
        assert_eq!(
            *upstream_tx.sent.lock().unwrap(),
            vec![
                UpstreamSent::Audio(b"mic-1".to_vec(), false),
                UpstreamSent::Audio(b"mic-2".to_vec(), false),
            ]
        );
        // The client script ends the session, so the downstream side may not
        // drain fully; whatever arrived must be an in-order prefix.
        let expected = [
            SentFrame::Binary(vec![9]),
            SentFrame::Text(r#"{"type":"turn_complete"}"#.into()),
        ];
        let frames = client_tx.frames.lock().unwrap();
        assert!(frames.len() <= expected.len());
        for (got, want) in frames.iter().zip(expected.iter()) {
            assert_eq!(got, want);
        }
    }
}
