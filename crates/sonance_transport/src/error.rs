//! Transport Error Types

use thiserror::Error;

/// Errors from audio-server transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to audio server: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to audio server")]
    Disconnected,

    #[error("Stream not found: {0}")]
    StreamNotFound(u64),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Invalid stream parameters: {0}")]
    InvalidParameters(String),
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
