//! Loopback Transport
//!
//! An in-process [`ServerTransport`] with no server behind it. Commands are
//! recorded, the connect handshake replays the canonical state sequence,
//! device listings are served from a configurable table, and a paired
//! [`LoopbackController`] lets the embedding host (or a test) inject
//! data-ready events and inspect everything the manager issued.
//!
//! The controller half holds the same shared state as the transport, so it
//! stays usable after the transport has been boxed and handed to the
//! manager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{TransportError, TransportResult};
use crate::traits::{
    BufferAttrs, ConnectionState, DeviceInfo, EventSink, SampleSpec, ServerTransport, StreamId,
    TransportEvent,
};

/// Per-stream bookkeeping inside the loopback
#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub label: String,
    pub spec: SampleSpec,
    /// Device the stream was connected against (None = default)
    pub device: Option<String>,
    /// Buffering hints passed at connect time
    pub attrs: Option<BufferAttrs>,
    /// Server-side index, assigned at creation
    pub server_index: u32,
    pub connected: bool,
    pub disconnected: bool,
    pub drained: bool,
    pub released: bool,
}

#[derive(Default)]
struct Shared {
    sink: Mutex<Option<EventSink>>,
    playback_devices: Mutex<Vec<DeviceInfo>>,
    capture_devices: Mutex<Vec<DeviceInfo>>,
    streams: Mutex<HashMap<u64, StreamRecord>>,
    /// Submitted playback buffers, in submission order
    writes: Mutex<Vec<(StreamId, Vec<u8>)>>,
    /// Chunks queued by the controller, pulled by `peek`
    capture_inbox: Mutex<HashMap<u64, Vec<u8>>>,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    refuse_stream_connect: AtomicBool,
    move_success: AtomicBool,
    next_stream: AtomicU64,
    next_index: AtomicU32,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        if let Some(sink) = self.sink.lock().as_ref() {
            // Receiver gone means the manager is shutting down
            let _ = sink.send(event);
        }
    }
}

/// In-process transport for tests and embedding demos
pub struct LoopbackTransport {
    shared: Arc<Shared>,
    /// Chunk currently exposed via `peek`, per stream
    current_chunk: HashMap<u64, Vec<u8>>,
}

impl LoopbackTransport {
    /// Create a loopback transport and its controller
    pub fn new() -> (Self, LoopbackController) {
        let shared = Arc::new(Shared {
            move_success: AtomicBool::new(true),
            next_stream: AtomicU64::new(1),
            next_index: AtomicU32::new(100),
            ..Shared::default()
        });
        let transport = Self {
            shared: Arc::clone(&shared),
            current_chunk: HashMap::new(),
        };
        (transport, LoopbackController { shared })
    }

    fn with_stream<T>(
        &self,
        stream: StreamId,
        f: impl FnOnce(&mut StreamRecord) -> T,
    ) -> TransportResult<T> {
        let mut streams = self.shared.streams.lock();
        let record = streams
            .get_mut(&stream.0)
            .filter(|r| !r.released)
            .ok_or(TransportError::StreamNotFound(stream.0))?;
        Ok(f(record))
    }
}

impl ServerTransport for LoopbackTransport {
    fn set_event_sink(&mut self, sink: EventSink) {
        *self.shared.sink.lock() = Some(sink);
    }

    fn connect(&mut self) -> TransportResult<()> {
        if self.shared.refuse_connect.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed("connect refused".into()));
        }
        self.shared.connected.store(true, Ordering::SeqCst);

        // Replay the canonical handshake sequence
        for state in [
            ConnectionState::Unconnected,
            ConnectionState::Connecting,
            ConnectionState::Authorizing,
            ConnectionState::SettingName,
            ConnectionState::Ready,
        ] {
            self.shared.emit(TransportEvent::StateChanged(state));
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    fn begin_playback_device_list(&mut self) -> TransportResult<()> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        for dev in self.shared.playback_devices.lock().iter() {
            self.shared.emit(TransportEvent::PlaybackDevice(Some(dev.clone())));
        }
        self.shared.emit(TransportEvent::PlaybackDevice(None));
        Ok(())
    }

    fn begin_capture_device_list(&mut self) -> TransportResult<()> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        for dev in self.shared.capture_devices.lock().iter() {
            self.shared.emit(TransportEvent::CaptureDevice(Some(dev.clone())));
        }
        self.shared.emit(TransportEvent::CaptureDevice(None));
        Ok(())
    }

    fn create_stream(&mut self, label: &str, spec: &SampleSpec) -> TransportResult<StreamId> {
        let id = self.shared.next_stream.fetch_add(1, Ordering::SeqCst);
        let index = self.shared.next_index.fetch_add(1, Ordering::SeqCst);
        self.shared.streams.lock().insert(
            id,
            StreamRecord {
                label: label.to_string(),
                spec: *spec,
                device: None,
                attrs: None,
                server_index: index,
                connected: false,
                disconnected: false,
                drained: false,
                released: false,
            },
        );
        debug!(stream = id, label, "loopback stream created");
        Ok(StreamId(id))
    }

    fn connect_playback(
        &mut self,
        stream: StreamId,
        device: Option<&str>,
        attrs: &BufferAttrs,
    ) -> TransportResult<()> {
        if self.shared.refuse_stream_connect.load(Ordering::SeqCst) {
            return Err(TransportError::CommandFailed("playback connect refused".into()));
        }
        self.with_stream(stream, |r| {
            r.device = device.map(str::to_string);
            r.attrs = Some(*attrs);
            r.connected = true;
        })
    }

    fn connect_record(
        &mut self,
        stream: StreamId,
        device: Option<&str>,
        attrs: &BufferAttrs,
    ) -> TransportResult<()> {
        if self.shared.refuse_stream_connect.load(Ordering::SeqCst) {
            return Err(TransportError::CommandFailed("record connect refused".into()));
        }
        self.with_stream(stream, |r| {
            r.device = device.map(str::to_string);
            r.attrs = Some(*attrs);
            r.connected = true;
        })
    }

    fn disconnect_stream(&mut self, stream: StreamId) {
        let _ = self.with_stream(stream, |r| {
            r.connected = false;
            r.disconnected = true;
        });
    }

    fn drain(&mut self, stream: StreamId) {
        // Nothing buffered server-side; just record that it happened
        let _ = self.with_stream(stream, |r| r.drained = true);
    }

    fn release_stream(&mut self, stream: StreamId) {
        let _ = self.with_stream(stream, |r| r.released = true);
        self.current_chunk.remove(&stream.0);
        self.shared.capture_inbox.lock().remove(&stream.0);
    }

    fn stream_index(&self, stream: StreamId) -> Option<u32> {
        self.shared
            .streams
            .lock()
            .get(&stream.0)
            .filter(|r| !r.released)
            .map(|r| r.server_index)
    }

    fn write(&mut self, stream: StreamId, data: Vec<u8>) -> TransportResult<()> {
        self.with_stream(stream, |_| ())?;
        self.shared.writes.lock().push((stream, data));
        Ok(())
    }

    fn peek(&mut self, stream: StreamId) -> Option<&[u8]> {
        if let Some(chunk) = self.shared.capture_inbox.lock().remove(&stream.0) {
            self.current_chunk.insert(stream.0, chunk);
        }
        self.current_chunk.get(&stream.0).map(Vec::as_slice)
    }

    fn advance(&mut self, stream: StreamId) {
        self.current_chunk.remove(&stream.0);
    }

    fn move_playback(&mut self, index: u32, device: &str) -> TransportResult<()> {
        self.complete_move(index, device)
    }

    fn move_record(&mut self, index: u32, device: &str) -> TransportResult<()> {
        self.complete_move(index, device)
    }
}

impl LoopbackTransport {
    fn complete_move(&mut self, index: u32, device: &str) -> TransportResult<()> {
        let stream = self
            .shared
            .streams
            .lock()
            .iter()
            .find(|(_, r)| r.server_index == index && !r.released)
            .map(|(id, _)| StreamId(*id))
            .ok_or(TransportError::StreamNotFound(index as u64))?;

        let success = self.shared.move_success.load(Ordering::SeqCst);
        if success {
            self.with_stream(stream, |r| r.device = Some(device.to_string()))?;
        }
        self.shared.emit(TransportEvent::MoveComplete { stream, success });
        Ok(())
    }
}

/// Host/test handle paired with a [`LoopbackTransport`]
///
/// Stays valid after the transport is boxed and handed to the manager.
#[derive(Clone)]
pub struct LoopbackController {
    shared: Arc<Shared>,
}

impl LoopbackController {
    /// Replace the playback device table served by enumeration
    pub fn set_playback_devices(&self, devices: Vec<DeviceInfo>) {
        *self.shared.playback_devices.lock() = devices;
    }

    /// Replace the capture device table served by enumeration
    pub fn set_capture_devices(&self, devices: Vec<DeviceInfo>) {
        *self.shared.capture_devices.lock() = devices;
    }

    /// Make the next `connect` call fail
    pub fn refuse_connect(&self, refuse: bool) {
        self.shared.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Make stream connect commands fail
    pub fn refuse_stream_connect(&self, refuse: bool) {
        self.shared.refuse_stream_connect.store(refuse, Ordering::SeqCst);
    }

    /// Set the success flag future move completions report
    pub fn set_move_success(&self, success: bool) {
        self.shared.move_success.store(success, Ordering::SeqCst);
    }

    /// Inject a write-readiness event for a playback stream
    pub fn request_write(&self, stream: StreamId, nbytes: usize) {
        self.shared.emit(TransportEvent::WriteReady { stream, nbytes });
    }

    /// Queue a captured chunk and signal read-readiness
    pub fn push_capture_chunk(&self, stream: StreamId, data: Vec<u8>) {
        self.shared.capture_inbox.lock().insert(stream.0, data);
        self.shared.emit(TransportEvent::ReadReady { stream });
    }

    /// Simulate a server-side state transition (e.g. connection failure)
    pub fn emit_state(&self, state: ConnectionState) {
        self.shared.emit(TransportEvent::StateChanged(state));
    }

    /// Buffers submitted via `write`, in submission order
    pub fn writes(&self) -> Vec<(StreamId, Vec<u8>)> {
        self.shared.writes.lock().clone()
    }

    /// Bookkeeping for one stream, if it ever existed
    pub fn stream_record(&self, stream: StreamId) -> Option<StreamRecord> {
        self.shared.streams.lock().get(&stream.0).cloned()
    }

    /// Every stream id ever created, in creation order
    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<u64> = self.shared.streams.lock().keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().map(StreamId).collect()
    }

    /// Whether the transport currently considers itself connected
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}
