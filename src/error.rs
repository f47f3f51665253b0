//! Error types for the SSE bridge

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Session is not open: {0}")]
    SessionClosed(String),

    #[error("Session inbound queue is full: {0}")]
    Backpressure(String),

    #[error("Endpoint already announced for session {0}")]
    AlreadyAnnounced(String),

    #[error("Invalid JSON-RPC envelope: {0}")]
    InvalidEnvelope(String),

    #[error("No endpoint event received from server")]
    MissingEndpoint,

    #[error("Timed out after {0:?} waiting for a correlated response")]
    Timeout(std::time::Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// JSON-RPC error code for this failure
    pub fn code(&self) -> i64 {
        match self {
            BridgeError::InvalidEnvelope(_) => -32600,
            BridgeError::Serialization(_) => -32700,
            BridgeError::SessionClosed(_) => -32001,
            BridgeError::Backpressure(_) => -32004,
            _ => -32603,
        }
    }
}
