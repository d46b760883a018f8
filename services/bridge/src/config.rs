use gemini_live::VoicePreset;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
///
/// Loaded exactly once; sessions receive it behind an `Arc` and never
/// mutate it.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub gemini_api_key: String,
    pub live_model: String,
    pub voice: VoicePreset,
    /// Whether upstream `interrupted` events are forwarded to the client
    /// (consumers that manage playback buffers want them; default off).
    pub forward_interruptions: bool,
    /// Deadline for opening the upstream session; the only scheduled
    /// timeout in the relay.
    pub upstream_connect_timeout: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let live_model = std::env::var("LIVE_MODEL")
            .unwrap_or_else(|_| "gemini-2.5-flash-native-audio-preview-12-2025".to_string());

        let voice_str = std::env::var("LIVE_VOICE").unwrap_or_else(|_| "Puck".to_string());
        let voice = voice_str
            .parse::<VoicePreset>()
            .map_err(|e| ConfigError::InvalidValue("LIVE_VOICE".to_string(), e.to_string()))?;

        let forward_str =
            std::env::var("FORWARD_INTERRUPTIONS").unwrap_or_else(|_| "false".to_string());
        let forward_interruptions = forward_str.parse::<bool>().map_err(|_| {
            ConfigError::InvalidValue(
                "FORWARD_INTERRUPTIONS".to_string(),
                format!("'{}' is not a bool", forward_str),
            )
        })?;

        let timeout_str =
            std::env::var("UPSTREAM_CONNECT_TIMEOUT_SECS").unwrap_or_else(|_| "10".to_string());
        let timeout_secs = timeout_str.parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(
                "UPSTREAM_CONNECT_TIMEOUT_SECS".to_string(),
                format!("'{}' is not a number of seconds", timeout_str),
            )
        })?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            gemini_api_key,
            live_model,
            voice,
            forward_interruptions,
            upstream_connect_timeout: Duration::from_secs(timeout_secs),
            log_level,
        })
    }
}
