//! Wire types for the `BidiGenerateContent` protocol, plus the public
//! configuration and event types they map to.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// The fixed set of prebuilt synthesis voices the Live API accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoicePreset {
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
}

impl VoicePreset {
    /// The exact spelling the wire protocol expects in `voiceName`.
    pub fn as_str(&self) -> &'static str {
        match self {
            VoicePreset::Puck => "Puck",
            VoicePreset::Charon => "Charon",
            VoicePreset::Kore => "Kore",
            VoicePreset::Fenrir => "Fenrir",
            VoicePreset::Aoede => "Aoede",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown voice preset: {0}")]
pub struct UnknownVoice(pub String);

impl FromStr for VoicePreset {
    type Err = UnknownVoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "puck" => Ok(VoicePreset::Puck),
            "charon" => Ok(VoicePreset::Charon),
            "kore" => Ok(VoicePreset::Kore),
            "fenrir" => Ok(VoicePreset::Fenrir),
            "aoede" => Ok(VoicePreset::Aoede),
            _ => Err(UnknownVoice(s.to_string())),
        }
    }
}

/// Everything needed to open one Live session.
#[derive(Clone, Debug)]
pub struct LiveConfig {
    pub api_key: String,
    pub model: String,
    pub voice: VoicePreset,
}

/// One event produced by the server side of a Live session.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// A chunk of synthesized PCM16 audio, decoded from the wire blob.
    Audio(Vec<u8>),
    /// Transcript or plain text emitted alongside the model turn.
    Transcript(String),
    /// The model finished its response turn.
    TurnComplete,
    /// The user started speaking while the model was still producing output.
    Interrupted,
}

// --- Client -> server messages -------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum ClientMessage {
    Setup(BidiGenerateContentSetup),
    RealtimeInput(BidiGenerateContentRealtimeInput),
    ClientContent(BidiGenerateContentClientContent),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BidiGenerateContentSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum ResponseModality {
    Audio,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BidiGenerateContentRealtimeInput {
    pub audio: Blob,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BidiGenerateContentClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Serialize)]
pub(crate) struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

#[derive(Serialize)]
pub(crate) struct Part {
    pub text: String,
}

impl ClientMessage {
    pub(crate) fn setup(config: &LiveConfig) -> Self {
        // The API requires the fully qualified resource name.
        let model = if config.model.starts_with("models/") {
            config.model.clone()
        } else {
            format!("models/{}", config.model)
        };
        ClientMessage::Setup(BidiGenerateContentSetup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![ResponseModality::Audio],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.as_str().to_string(),
                        },
                    },
                },
            },
        })
    }

    pub(crate) fn audio_chunk(pcm: &[u8]) -> Self {
        ClientMessage::RealtimeInput(BidiGenerateContentRealtimeInput {
            audio: Blob {
                mime_type: "audio/pcm;rate=16000".to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(pcm),
            },
        })
    }

    pub(crate) fn user_turn(text: String, turn_complete: bool) -> Self {
        ClientMessage::ClientContent(BidiGenerateContentClientContent {
            turns: vec![Content {
                role: "user".to_string(),
                parts: vec![Part { text }],
            }],
            turn_complete,
        })
    }

    /// An empty `clientContent` that only closes the open turn.
    pub(crate) fn end_of_turn() -> Self {
        ClientMessage::ClientContent(BidiGenerateContentClientContent {
            turns: vec![],
            turn_complete: true,
        })
    }
}

// --- Server -> client messages -------------------------------------------

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<LiveServerContent>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LiveServerContent {
    pub model_turn: Option<ServerContentTurn>,
    pub input_transcription: Option<ServerTranscription>,
    pub output_transcription: Option<ServerTranscription>,
    pub turn_complete: Option<bool>,
    pub interrupted: Option<bool>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ServerContentTurn {
    pub parts: Vec<ServerPart>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<ServerBlob>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ServerBlob {
    pub data: String,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ServerTranscription {
    pub text: String,
}

/// Flattens one server frame into zero or more events, in wire order.
///
/// The schema has drifted across API revisions (flat audio vs. a nested
/// `modelTurn` parts list); the nested shape is the superset and is the one
/// parsed here. Frames that match neither are logged and dropped rather
/// than guessed at.
pub(crate) fn parse_server_payload(raw: &[u8]) -> Vec<LiveEvent> {
    let msg: ServerMessage = match serde_json::from_slice(raw) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "dropping unparseable live server frame");
            return Vec::new();
        }
    };

    let Some(content) = msg.server_content else {
        if msg.setup_complete.is_none() {
            warn!("dropping live server frame with no recognized fields");
        }
        return Vec::new();
    };

    let mut events = Vec::new();
    if content.interrupted == Some(true) {
        events.push(LiveEvent::Interrupted);
    }
    if let Some(transcription) = content.input_transcription {
        events.push(LiveEvent::Transcript(transcription.text));
    }
    if let Some(transcription) = content.output_transcription {
        events.push(LiveEvent::Transcript(transcription.text));
    }
    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(blob) = part.inline_data {
                match base64::engine::general_purpose::STANDARD.decode(&blob.data) {
                    Ok(pcm) => events.push(LiveEvent::Audio(pcm)),
                    Err(e) => warn!(error = %e, "dropping audio part with invalid base64"),
                }
            }
            if let Some(text) = part.text {
                events.push(LiveEvent::Transcript(text));
            }
        }
    }
    if content.turn_complete == Some(true) {
        events.push(LiveEvent::TurnComplete);
    }
    events
}
