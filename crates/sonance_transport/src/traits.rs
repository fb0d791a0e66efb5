//! Audio-Server Transport Trait
//!
//! Defines the capability set the connection manager consumes. A transport
//! wraps one session with the audio server: connection lifecycle, async
//! device listing, stream creation and teardown, and the buffer primitives
//! for moving sample data.
//!
//! # Threading contract
//!
//! Implementations are NOT required to be internally synchronized. The
//! manager in `sonance_core` calls every method while holding its shared
//! lock, from either the host thread or its event-loop thread, never
//! concurrently. Asynchronous outcomes (state changes, device list items,
//! data readiness, move completions) are delivered through the
//! [`EventSink`] registered with [`ServerTransport::set_event_sink`]; the
//! manager drains that channel on its event-loop thread.

use serde::{Deserialize, Serialize};

use crate::error::TransportResult;

/// Opaque identifier for a transport-owned stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub u64);

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Connection state, mirroring the server's own context states
///
/// A fresh connection starts `Unconnected` and walks through the handshake
/// states to `Ready`. `Failed` and `Terminated` are terminal for that
/// connection instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Authorizing,
    SettingName,
    Ready,
    Failed,
    Terminated,
}

impl ConnectionState {
    /// Whether the connection is usable for commands
    pub fn is_ready(self) -> bool {
        self == ConnectionState::Ready
    }

    /// Whether this state can never transition again
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Terminated)
    }
}

/// One device descriptor, produced during enumeration
///
/// Transient: the manager hands it to the host and does not retain it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Server-side numeric index
    pub index: u32,

    /// Short device name (routing target for stream creation and moves)
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Native sample rate in Hz
    pub sample_rate: u32,

    /// Channel count
    pub channels: u8,
}

/// Sample format and layout for a stream
///
/// The format is fixed: signed 16-bit little-endian PCM. Rate and channel
/// count are caller-specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSpec {
    /// Sample rate in Hz
    pub rate: u32,

    /// Number of interleaved channels
    pub channels: u8,
}

impl SampleSpec {
    /// Bytes per frame (one S16LE sample per channel)
    pub fn frame_bytes(&self) -> usize {
        2 * self.channels as usize
    }
}

/// Server-side buffering hints for stream connection
///
/// `None` means "server default", replacing the C convention of passing
/// `(uint32_t)-1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferAttrs {
    /// Maximum server-side buffer length in bytes
    pub maxlength: Option<u32>,

    /// Playback target buffer length in bytes
    pub tlength: Option<u32>,

    /// Bytes buffered before playback starts
    pub prebuf: Option<u32>,

    /// Minimum bytes the server requests per write
    pub minreq: Option<u32>,

    /// Capture fragment size in bytes
    pub fragsize: Option<u32>,
}

/// Asynchronous notifications from the transport
///
/// Delivered on the sink registered via [`ServerTransport::set_event_sink`]
/// and dispatched by the manager's event-loop thread.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The connection entered a new state
    StateChanged(ConnectionState),

    /// One playback device list item; `None` marks end of list
    PlaybackDevice(Option<DeviceInfo>),

    /// One capture device list item; `None` marks end of list
    CaptureDevice(Option<DeviceInfo>),

    /// A playback stream wants `nbytes` of data written
    WriteReady { stream: StreamId, nbytes: usize },

    /// A capture stream has a chunk available to peek
    ReadReady { stream: StreamId },

    /// A previously issued move completed
    MoveComplete { stream: StreamId, success: bool },
}

/// Channel endpoint a transport delivers its events into
pub type EventSink = crossbeam_channel::Sender<TransportEvent>;

/// One session with the audio server, consumed as an opaque capability set
///
/// Object-safe so the manager can hold `Box<dyn ServerTransport>`; `Send`
/// so ownership can live behind the manager's lock while both the host
/// thread and the event-loop thread call in.
pub trait ServerTransport: Send {
    /// Register the sink all asynchronous events are delivered into
    ///
    /// Called once by the manager before `connect`.
    fn set_event_sink(&mut self, sink: EventSink);

    /// Issue the connect command
    ///
    /// Success means the command was accepted; the handshake itself is
    /// asynchronous and reported via `StateChanged` events.
    fn connect(&mut self) -> TransportResult<()>;

    /// Tear the connection down
    fn disconnect(&mut self);

    /// Begin an asynchronous playback-device listing
    ///
    /// Results arrive as `PlaybackDevice` events, terminated by `None`.
    fn begin_playback_device_list(&mut self) -> TransportResult<()>;

    /// Begin an asynchronous capture-device listing
    fn begin_capture_device_list(&mut self) -> TransportResult<()>;

    /// Allocate a new (not yet connected) stream
    fn create_stream(&mut self, label: &str, spec: &SampleSpec) -> TransportResult<StreamId>;

    /// Connect a stream for playback against `device` (None = default sink)
    fn connect_playback(
        &mut self,
        stream: StreamId,
        device: Option<&str>,
        attrs: &BufferAttrs,
    ) -> TransportResult<()>;

    /// Connect a stream for recording against `device` (None = default
    /// source), with server-side latency adjustment requested
    fn connect_record(
        &mut self,
        stream: StreamId,
        device: Option<&str>,
        attrs: &BufferAttrs,
    ) -> TransportResult<()>;

    /// Disconnect a stream from its device
    fn disconnect_stream(&mut self, stream: StreamId);

    /// Block until all buffered data for the stream has been flushed
    fn drain(&mut self, stream: StreamId);

    /// Release the stream handle; the id is invalid afterwards
    fn release_stream(&mut self, stream: StreamId);

    /// Server-side numeric index of a connected stream (move target lookup)
    fn stream_index(&self, stream: StreamId) -> Option<u32>;

    /// Submit a filled playback buffer (relative seek); ownership moves to
    /// the transport, which releases it after consumption
    fn write(&mut self, stream: StreamId, data: Vec<u8>) -> TransportResult<()>;

    /// Borrow the next available captured chunk, if any
    ///
    /// The returned slice is owned by the transport and only valid until
    /// [`ServerTransport::advance`] is called for the same stream.
    fn peek(&mut self, stream: StreamId) -> Option<&[u8]>;

    /// Advance the capture stream past the chunk returned by `peek`
    fn advance(&mut self, stream: StreamId);

    /// Reassign the playback stream with server index `index` to the named
    /// sink; completion arrives as a `MoveComplete` event
    fn move_playback(&mut self, index: u32, device: &str) -> TransportResult<()>;

    /// Reassign the capture stream with server index `index` to the named
    /// source
    fn move_record(&mut self, index: u32, device: &str) -> TransportResult<()>;
}
