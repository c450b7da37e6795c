//! Realtime delivery errors

use thiserror::Error;

/// Errors raised by the WebSocket feed
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Socket bind or accept failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Client sent a frame the server does not understand
    #[error("Invalid client message: {0}")]
    InvalidMessage(String),
}

/// Result alias for realtime operations
pub type Result<T> = std::result::Result<T, RealtimeError>;
