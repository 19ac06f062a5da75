//! Error types for the Chorus voice client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoiceClientError {
    /// An error from the WebSocket layer.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The signaling connection was not established.
    #[error("Voice connection is not established")]
    NotConnected,

    /// The media layer failed to produce or consume a payload.
    #[error("Media error: {0}")]
    Media(String),
}

pub type Result<T> = std::result::Result<T, VoiceClientError>;
