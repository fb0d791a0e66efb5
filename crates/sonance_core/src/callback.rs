//! Host Notification Types
//!
//! Boxed closure bindings that replace the opaque userdata pointers of a
//! native callback API. All of them are invoked on the event-loop thread
//! while the manager's lock is held, so they may synchronously issue
//! further manager commands — except [`ReadCallback`], which holds a chunk
//! borrowed from the transport and must not re-enter the manager.
//!
//! Callbacks run inside the dispatch critical section: a callback that
//! blocks stalls every manager operation. Keep them fast.

use sonance_transport::{ConnectionState, DeviceInfo};

/// Connection state-change notification
pub type StateCallback = Box<dyn FnMut(ConnectionState) + Send>;

/// Per-device enumeration notification; `None` marks end of list
pub type DeviceCallback = Box<dyn FnMut(Option<&DeviceInfo>) + Send>;

/// Playback data request: fill the buffer with S16LE frames
///
/// The buffer is owned by the core for exactly the duration of the call
/// and is submitted to the transport immediately after it returns.
pub type WriteCallback = Box<dyn FnMut(&mut [u8]) + Send>;

/// Capture data delivery: a borrowed chunk of S16LE frames
///
/// The slice is owned by the transport and must not be retained past the
/// call; the core advances the stream past it on return.
pub type ReadCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Stream-move completion; fires exactly once per issued move
pub type MoveCallback = Box<dyn FnOnce(bool) + Send>;
