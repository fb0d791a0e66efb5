//! Manager Error Types

use thiserror::Error;

use sonance_transport::TransportError;

/// Errors that can occur in the connection manager
///
/// Nothing here is fatal to the host process; every failure is a
/// non-fatal return or a skipped cycle.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Stream pool exhausted")]
    PoolExhausted,

    #[error("Slot {0} is not active")]
    InactiveSlot(usize),

    #[error("Connection already started")]
    AlreadyConnected,

    #[error("Invalid stream parameters: {0}")]
    InvalidParams(String),

    #[error("Failed to start event loop thread: {0}")]
    LoopStartFailed(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type alias for manager operations
pub type Result<T> = std::result::Result<T, Error>;
