//! Sonance core: connection and stream lifecycle management
//!
//! Sits between host application code and an audio-server transport,
//! owning one session per [`Connection`]:
//!
//! ```text
//!   host thread(s)                      event-loop thread
//!        |                                     |
//!        v                                     v
//!   Connection  ---- shared lock ---->  dispatch::handle_event
//!        |                                     ^
//!        v                                     | TransportEvent
//!   ServerTransport  -------- event sink -----+
//! ```
//!
//! Host commands (create, destroy, move, enumerate) run on the caller's
//! thread; everything the server initiates (state changes, device
//! listings, write readiness, captured data, move completions) is
//! delivered through registered callbacks on the event-loop thread.
//! Both sides serialize on a single re-entrant lock, so callbacks may
//! issue further commands but must never block.
//!
//! Streams live in fixed pools of [`MAX_STREAMS`] slots per direction
//! and are addressed by the [`PlaybackSlot`]/[`CaptureSlot`] handles the
//! create calls return.

mod callback;
mod config;
mod connection;
mod dispatch;
mod error;
mod pool;

pub use callback::{DeviceCallback, MoveCallback, ReadCallback, StateCallback, WriteCallback};
pub use config::StreamParams;
pub use connection::Connection;
pub use dispatch::{DEVICE_DESC_MAX, DEVICE_NAME_MAX};
pub use error::{Error, Result};
pub use pool::{CaptureSlot, PlaybackSlot, MAX_STREAMS};

// Transport-level types that appear in this crate's public API
pub use sonance_transport::{
    BufferAttrs, ConnectionState, DeviceInfo, SampleSpec, ServerTransport, StreamId,
    TransportError, TransportEvent,
};
