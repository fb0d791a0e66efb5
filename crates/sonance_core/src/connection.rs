//! Connection Manager
//!
//! Owns one audio-server session end to end: the transport handle, the
//! event-loop thread that drains transport events, and the fixed pools of
//! playback and capture stream slots.
//!
//! # Locking
//!
//! A single `ReentrantMutex<RefCell<Inner>>` guards the transport and all
//! stream state. Host commands acquire it on the calling thread; the
//! event-loop thread acquires it around each dispatched event. Host
//! callbacks therefore run with the lock held, and because the lock is
//! re-entrant for its owner they may synchronously issue further manager
//! commands without deadlocking. A callback that blocks stalls every
//! manager operation; callbacks must be fast by contract.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use parking_lot::ReentrantMutex;
use tracing::{debug, error, info, warn};

use sonance_transport::{
    ConnectionState, DeviceInfo, ServerTransport, TransportError, TransportEvent,
};

use crate::callback::{DeviceCallback, ReadCallback, StateCallback, WriteCallback};
use crate::config::StreamParams;
use crate::dispatch;
use crate::error::{Error, Result};
use crate::pool::{CaptureSlot, PlaybackSlot, SlotTable, MAX_STREAMS};

/// How often the event loop wakes to check the shutdown flag
const EVENT_POLL: Duration = Duration::from_millis(50);

/// Everything behind the shared lock
pub(crate) struct Inner {
    pub transport: Box<dyn ServerTransport>,
    pub state: ConnectionState,
    pub on_state: Option<StateCallback>,
    pub on_playback_device: Option<DeviceCallback>,
    pub on_capture_device: Option<DeviceCallback>,
    pub playback: SlotTable<WriteCallback>,
    pub capture: SlotTable<ReadCallback>,
}

pub(crate) type SharedInner = Arc<ReentrantMutex<RefCell<Inner>>>;

/// One managed session with the audio server
///
/// Created unconnected; [`Connection::connect`] starts the event-loop
/// thread and drives the handshake. Dropping the connection stops the
/// thread (blocking join) and releases the transport.
pub struct Connection {
    name: String,
    inner: SharedInner,
    /// Taken by `connect` when the event-loop thread starts
    event_rx: Option<Receiver<TransportEvent>>,
    loop_thread: Option<JoinHandle<()>>,
    shutdown_flag: Arc<AtomicBool>,
}

impl Connection {
    /// Initialize a manager around a transport
    ///
    /// Allocates the event channel and registers it with the transport;
    /// does not start the event-loop thread and does not connect.
    pub fn new(name: impl Into<String>, mut transport: impl ServerTransport + 'static) -> Self {
        let name = name.into();
        let (event_tx, event_rx) = unbounded();
        transport.set_event_sink(event_tx);

        let inner = Inner {
            transport: Box::new(transport),
            state: ConnectionState::Unconnected,
            on_state: None,
            on_playback_device: None,
            on_capture_device: None,
            playback: SlotTable::new(),
            capture: SlotTable::new(),
        };

        info!(name = %name, "connection manager initialized");
        Self {
            name,
            inner: Arc::new(ReentrantMutex::new(RefCell::new(inner))),
            event_rx: Some(event_rx),
            loop_thread: None,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connect to the audio server and start the event-loop thread
    ///
    /// `on_state` fires exactly once per connection-state transition, on
    /// the event-loop thread. If the connect command is refused the thread
    /// is never started and a later retry is allowed; if the thread cannot
    /// start, the partially established connection is unwound with a
    /// disconnect.
    pub fn connect(&mut self, on_state: impl FnMut(ConnectionState) + Send + 'static) -> Result<()> {
        if self.loop_thread.is_some() {
            return Err(Error::AlreadyConnected);
        }
        let guard = self.inner.lock();
        {
            let mut st = guard.borrow_mut();
            st.transport.connect().map_err(|e| {
                error!(error = %e, "unable to connect to audio server");
                Error::from(e)
            })?;
            st.on_state = Some(Box::new(on_state));
        }

        let Some(events) = self.event_rx.take() else {
            return Err(Error::AlreadyConnected);
        };
        let inner = Arc::clone(&self.inner);
        let shutdown = Arc::clone(&self.shutdown_flag);
        let loop_events = events.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-loop", self.name))
            .spawn(move || event_loop(inner, loop_events, shutdown));

        match spawned {
            Ok(handle) => {
                self.loop_thread = Some(handle);
                info!(name = %self.name, "connected, event loop running");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "unable to start event loop thread");
                let mut st = guard.borrow_mut();
                st.on_state = None;
                st.transport.disconnect();
                self.event_rx = Some(events);
                Err(Error::LoopStartFailed(e.to_string()))
            }
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().borrow().state
    }

    /// Whether the connection is ready for stream commands
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Connection name given at initialization
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of active playback slots
    pub fn active_playback_streams(&self) -> usize {
        self.inner.lock().borrow().playback.active_count()
    }

    /// Number of active capture slots
    pub fn active_capture_streams(&self) -> usize {
        self.inner.lock().borrow().capture.active_count()
    }

    /// Begin an asynchronous playback-device listing
    ///
    /// `on_device` fires once per device with `Some(descriptor)` and then
    /// exactly once with `None` (end of list). Name and description are
    /// bounded to [`dispatch::DEVICE_NAME_MAX`]/[`dispatch::DEVICE_DESC_MAX`]
    /// characters. A second listing issued before the first completes
    /// overwrites the first's registration.
    pub fn list_playback_devices(
        &self,
        on_device: impl FnMut(Option<&DeviceInfo>) + Send + 'static,
    ) -> Result<()> {
        let guard = self.inner.lock();
        let mut st = guard.borrow_mut();
        st.on_playback_device = Some(Box::new(on_device));
        if let Err(e) = st.transport.begin_playback_device_list() {
            st.on_playback_device = None;
            error!(error = %e, "failed to begin playback device listing");
            return Err(e.into());
        }
        Ok(())
    }

    /// Begin an asynchronous capture-device listing (see
    /// [`Connection::list_playback_devices`] for the protocol)
    pub fn list_capture_devices(
        &self,
        on_device: impl FnMut(Option<&DeviceInfo>) + Send + 'static,
    ) -> Result<()> {
        let guard = self.inner.lock();
        let mut st = guard.borrow_mut();
        st.on_capture_device = Some(Box::new(on_device));
        if let Err(e) = st.transport.begin_capture_device_list() {
            st.on_capture_device = None;
            error!(error = %e, "failed to begin capture device listing");
            return Err(e.into());
        }
        Ok(())
    }

    /// Create a playback stream against `device` (None = default sink)
    ///
    /// S16LE at the rate/channel count in `params`. Fails with
    /// [`Error::PoolExhausted`] without side effects when all
    /// [`MAX_STREAMS`] slots are active. A failure of the subsequent
    /// connect-for-playback command is reported in the log but does not
    /// roll the slot back; the stream stays allocated and unconnected.
    pub fn create_playback_stream(
        &self,
        device: Option<&str>,
        label: &str,
        params: StreamParams,
        on_write: impl FnMut(&mut [u8]) + Send + 'static,
    ) -> Result<PlaybackSlot> {
        params.validate().map_err(Error::InvalidParams)?;
        let guard = self.inner.lock();
        let mut st = guard.borrow_mut();

        let Some(index) = st.playback.find_free() else {
            warn!("playback stream pool exhausted");
            return Err(Error::PoolExhausted);
        };
        let stream = st.transport.create_stream(label, &params.sample_spec())?;
        st.playback.occupy(index, stream, Box::new(on_write));

        if let Err(e) = st
            .transport
            .connect_playback(stream, device, &params.playback_attrs())
        {
            error!(slot = index, error = %e, "failed to connect stream for playback");
        }
        debug!(slot = index, %stream, label, "playback stream created");
        Ok(PlaybackSlot(index))
    }

    /// Create a capture stream against `device` (None = default source)
    ///
    /// Same slot discipline as [`Connection::create_playback_stream`];
    /// the record connect additionally pins the fragment size and requests
    /// server-side latency adjustment.
    pub fn create_capture_stream(
        &self,
        device: Option<&str>,
        label: &str,
        params: StreamParams,
        on_read: impl FnMut(&[u8]) + Send + 'static,
    ) -> Result<CaptureSlot> {
        params.validate().map_err(Error::InvalidParams)?;
        let guard = self.inner.lock();
        let mut st = guard.borrow_mut();

        let Some(index) = st.capture.find_free() else {
            warn!("capture stream pool exhausted");
            return Err(Error::PoolExhausted);
        };
        let stream = st.transport.create_stream(label, &params.sample_spec())?;
        st.capture.occupy(index, stream, Box::new(on_read));

        if let Err(e) = st
            .transport
            .connect_record(stream, device, &params.capture_attrs())
        {
            error!(slot = index, error = %e, "failed to connect stream for recording");
        }
        debug!(slot = index, %stream, label, "capture stream created");
        Ok(CaptureSlot(index))
    }

    /// Destroy a playback stream: disconnect, drain (blocking), release
    ///
    /// Destroying an inactive slot reports [`Error::InactiveSlot`] and
    /// leaves the pool unchanged.
    pub fn destroy_playback_stream(&self, slot: PlaybackSlot) -> Result<()> {
        let guard = self.inner.lock();
        let mut st = guard.borrow_mut();
        match st.playback.release(slot.0) {
            Some(stream) => {
                st.transport.disconnect_stream(stream);
                st.transport.drain(stream);
                st.transport.release_stream(stream);
                debug!(slot = slot.0, %stream, "playback stream destroyed");
                Ok(())
            }
            None => {
                error!(slot = slot.0, "destroying an inactive playback stream");
                Err(Error::InactiveSlot(slot.0))
            }
        }
    }

    /// Destroy a capture stream (see [`Connection::destroy_playback_stream`])
    pub fn destroy_capture_stream(&self, slot: CaptureSlot) -> Result<()> {
        let guard = self.inner.lock();
        let mut st = guard.borrow_mut();
        match st.capture.release(slot.0) {
            Some(stream) => {
                st.transport.disconnect_stream(stream);
                st.transport.drain(stream);
                st.transport.release_stream(stream);
                debug!(slot = slot.0, %stream, "capture stream destroyed");
                Ok(())
            }
            None => {
                error!(slot = slot.0, "destroying an inactive capture stream");
                Err(Error::InactiveSlot(slot.0))
            }
        }
    }

    /// Reassign an active playback stream to the named sink
    ///
    /// `on_complete` fires exactly once with the server's success flag, on
    /// the event-loop thread. Issuance failures surface synchronously and
    /// the callback is dropped unfired.
    pub fn move_playback_stream(
        &self,
        slot: PlaybackSlot,
        target: &str,
        on_complete: impl FnOnce(bool) + Send + 'static,
    ) -> Result<()> {
        let guard = self.inner.lock();
        let mut st = guard.borrow_mut();
        let inner = &mut *st;

        let Some(entry) = inner.playback.get_active_mut(slot.0) else {
            error!(slot = slot.0, "moving an inactive playback stream");
            return Err(Error::InactiveSlot(slot.0));
        };
        let Some(stream) = entry.stream else {
            return Err(Error::InactiveSlot(slot.0));
        };
        let server_index = inner
            .transport
            .stream_index(stream)
            .ok_or(Error::Transport(TransportError::StreamNotFound(stream.0)))?;
        inner.transport.move_playback(server_index, target)?;
        // Completion can only be dispatched under this lock, so binding
        // after issuance cannot miss the event
        entry.move_cb = Some(Box::new(on_complete));
        debug!(slot = slot.0, target, "playback stream move issued");
        Ok(())
    }

    /// Reassign an active capture stream to the named source
    pub fn move_capture_stream(
        &self,
        slot: CaptureSlot,
        target: &str,
        on_complete: impl FnOnce(bool) + Send + 'static,
    ) -> Result<()> {
        let guard = self.inner.lock();
        let mut st = guard.borrow_mut();
        let inner = &mut *st;

        let Some(entry) = inner.capture.get_active_mut(slot.0) else {
            error!(slot = slot.0, "moving an inactive capture stream");
            return Err(Error::InactiveSlot(slot.0));
        };
        let Some(stream) = entry.stream else {
            return Err(Error::InactiveSlot(slot.0));
        };
        let server_index = inner
            .transport
            .stream_index(stream)
            .ok_or(Error::Transport(TransportError::StreamNotFound(stream.0)))?;
        inner.transport.move_record(server_index, target)?;
        entry.move_cb = Some(Box::new(on_complete));
        debug!(slot = slot.0, target, "capture stream move issued");
        Ok(())
    }

    /// Stop the event-loop thread and release the transport
    ///
    /// Blocks until the thread exits. Destroying streams first is the
    /// caller's responsibility; any still-active slots are logged and
    /// their handles released so nothing leaks. Idempotent; also run by
    /// `Drop`.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.loop_thread.take() {
            self.shutdown_flag.store(true, Ordering::SeqCst);
            if handle.join().is_err() {
                warn!("event loop thread panicked during shutdown");
            }
        }

        let guard = self.inner.lock();
        let mut st = guard.borrow_mut();
        let playback = st.playback.active_count();
        let capture = st.capture.active_count();
        if playback > 0 || capture > 0 {
            warn!(
                playback,
                capture, "shutting down with active streams; destroy streams before dropping"
            );
        }
        for index in 0..MAX_STREAMS {
            if let Some(stream) = st.playback.release(index) {
                st.transport.disconnect_stream(stream);
                st.transport.release_stream(stream);
            }
            if let Some(stream) = st.capture.release(index) {
                st.transport.disconnect_stream(stream);
                st.transport.release_stream(stream);
            }
        }
        st.transport.disconnect();
        info!(name = %self.name, "connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Event-loop thread body: drain transport events, dispatch under the lock
///
/// The lock is held only while dispatching; the thread waits on the
/// channel unlocked so host commands are never starved.
fn event_loop(
    inner: SharedInner,
    events: Receiver<TransportEvent>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("event loop started");
    while !shutdown.load(Ordering::SeqCst) {
        match events.recv_timeout(EVENT_POLL) {
            Ok(event) => dispatch::handle_event(&inner, event),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use crossbeam_channel::Sender;

    use sonance_transport::{DeviceInfo, LoopbackController, LoopbackTransport};

    fn init() -> (Connection, LoopbackController) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("sonance_core=debug")
            .with_test_writer()
            .try_init();
        let (transport, controller) = LoopbackTransport::new();
        (Connection::new("test", transport), controller)
    }

    fn connect_and_wait(conn: &mut Connection) -> Receiver<ConnectionState> {
        let (tx, rx) = unbounded();
        conn.connect(move |state| {
            let _ = tx.send(state);
        })
        .unwrap();
        wait_for(|| conn.is_ready());
        rx
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn device(index: u32, name: &str, description: &str) -> DeviceInfo {
        DeviceInfo {
            index,
            name: name.into(),
            description: description.into(),
            sample_rate: 48000,
            channels: 2,
        }
    }

    fn collect_listing(rx: &Receiver<Option<DeviceInfo>>) -> Vec<Option<DeviceInfo>> {
        let mut items = Vec::new();
        loop {
            let item = rx
                .recv_timeout(Duration::from_secs(2))
                .expect("listing did not terminate");
            let done = item.is_none();
            items.push(item);
            if done {
                return items;
            }
        }
    }

    #[test]
    fn test_connect_observes_full_state_sequence() {
        let (mut conn, _controller) = init();
        assert_eq!(conn.state(), ConnectionState::Unconnected);

        let rx = connect_and_wait(&mut conn);
        let states: Vec<ConnectionState> = rx.try_iter().collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::Unconnected,
                ConnectionState::Connecting,
                ConnectionState::Authorizing,
                ConnectionState::SettingName,
                ConnectionState::Ready,
            ]
        );
    }

    #[test]
    fn test_refused_connect_allows_retry() {
        let (mut conn, controller) = init();
        controller.refuse_connect(true);
        assert!(matches!(conn.connect(|_| {}), Err(Error::Transport(_))));
        assert_eq!(conn.state(), ConnectionState::Unconnected);

        controller.refuse_connect(false);
        connect_and_wait(&mut conn);
        assert!(conn.is_ready());
    }

    #[test]
    fn test_second_connect_is_rejected() {
        let (mut conn, _controller) = init();
        connect_and_wait(&mut conn);
        assert!(matches!(conn.connect(|_| {}), Err(Error::AlreadyConnected)));
    }

    #[test]
    fn test_server_side_failure_reaches_host() {
        let (mut conn, controller) = init();
        let rx = connect_and_wait(&mut conn);
        let _ = rx.try_iter().count();

        controller.emit_state(ConnectionState::Failed);
        wait_for(|| conn.state() == ConnectionState::Failed);
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![ConnectionState::Failed]
        );
    }

    #[test]
    fn test_playback_stream_lifecycle() {
        let (mut conn, controller) = init();
        connect_and_wait(&mut conn);

        let slot = conn
            .create_playback_stream(None, "t", StreamParams::new(44100, 2, 4096), |_| {})
            .unwrap();
        assert_eq!(conn.active_playback_streams(), 1);

        let record = controller.stream_record(controller.stream_ids()[0]).unwrap();
        assert!(record.connected);
        assert_eq!(record.device, None);
        assert_eq!(record.attrs.unwrap().tlength, Some(4096 * 4));

        conn.destroy_playback_stream(slot).unwrap();
        assert_eq!(conn.active_playback_streams(), 0);
        let record = controller.stream_record(controller.stream_ids()[0]).unwrap();
        assert!(record.disconnected && record.drained && record.released);

        // Second destroy is a reported error, not a crash
        assert!(matches!(
            conn.destroy_playback_stream(slot),
            Err(Error::InactiveSlot(_))
        ));
        assert_eq!(conn.active_playback_streams(), 0);
    }

    #[test]
    fn test_destroy_of_never_created_slot() {
        let (mut conn, _controller) = init();
        connect_and_wait(&mut conn);
        assert!(matches!(
            conn.destroy_playback_stream(PlaybackSlot(5)),
            Err(Error::InactiveSlot(5))
        ));
        assert!(matches!(
            conn.destroy_capture_stream(CaptureSlot(0)),
            Err(Error::InactiveSlot(0))
        ));
    }

    #[test]
    fn test_playback_pool_capacity() {
        let (mut conn, controller) = init();
        connect_and_wait(&mut conn);
        let params = StreamParams::default();

        let slots: Vec<PlaybackSlot> = (0..MAX_STREAMS)
            .map(|_| {
                conn.create_playback_stream(None, "fill", params, |_| {})
                    .unwrap()
            })
            .collect();
        assert_eq!(conn.active_playback_streams(), MAX_STREAMS);

        // The 17th call fails without touching existing slots
        assert!(matches!(
            conn.create_playback_stream(None, "overflow", params, |_| {}),
            Err(Error::PoolExhausted)
        ));
        assert_eq!(conn.active_playback_streams(), MAX_STREAMS);
        assert_eq!(controller.stream_ids().len(), MAX_STREAMS);

        for slot in slots {
            conn.destroy_playback_stream(slot).unwrap();
        }
    }

    #[test]
    fn test_capture_pool_reuses_lowest_slot() {
        let (mut conn, _controller) = init();
        connect_and_wait(&mut conn);
        let params = StreamParams::default();

        let slots: Vec<CaptureSlot> = (0..MAX_STREAMS)
            .map(|_| {
                conn.create_capture_stream(None, "fill", params, |_| {})
                    .unwrap()
            })
            .collect();
        assert!(matches!(
            conn.create_capture_stream(None, "overflow", params, |_| {}),
            Err(Error::PoolExhausted)
        ));

        conn.destroy_capture_stream(slots[0]).unwrap();
        let reused = conn
            .create_capture_stream(None, "reuse", params, |_| {})
            .unwrap();
        assert_eq!(reused.index(), 0);
    }

    #[test]
    fn test_enumeration_terminates_and_truncates() {
        let (mut conn, controller) = init();
        connect_and_wait(&mut conn);

        controller.set_playback_devices(vec![
            device(0, &"n".repeat(300), &"d".repeat(400)),
            device(1, "sink1", "Second Sink"),
        ]);

        let (tx, rx) = unbounded::<Option<DeviceInfo>>();
        conn.list_playback_devices(move |d| {
            let _ = tx.send(d.cloned());
        })
        .unwrap();

        let items = collect_listing(&rx);
        assert_eq!(items.len(), 3);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.name.chars().count(), dispatch::DEVICE_NAME_MAX);
        assert_eq!(first.description.chars().count(), dispatch::DEVICE_DESC_MAX);
        assert_eq!(items[1].as_ref().unwrap().name, "sink1");
        assert!(items[2].is_none());
    }

    #[test]
    fn test_capture_enumeration_empty_list() {
        let (mut conn, _controller) = init();
        connect_and_wait(&mut conn);

        // No devices: the listing still terminates with the end marker
        let (tx, rx) = unbounded::<Option<DeviceInfo>>();
        conn.list_capture_devices(move |d| {
            let _ = tx.send(d.cloned());
        })
        .unwrap();

        let items = collect_listing(&rx);
        assert_eq!(items, vec![None]);
    }

    #[test]
    fn test_move_completion_fires_exactly_once() {
        let (mut conn, controller) = init();
        connect_and_wait(&mut conn);
        let slot = conn
            .create_playback_stream(None, "t", StreamParams::default(), |_| {})
            .unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_cb = Arc::clone(&fired);
        conn.move_playback_stream(slot, "headphones", move |success| {
            assert!(success);
            fired_in_cb.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        wait_for(|| fired.load(Ordering::SeqCst) == 1);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let record = controller.stream_record(controller.stream_ids()[0]).unwrap();
        assert_eq!(record.device.as_deref(), Some("headphones"));
    }

    #[test]
    fn test_failed_move_reports_false() {
        let (mut conn, controller) = init();
        connect_and_wait(&mut conn);
        let slot = conn
            .create_capture_stream(None, "mic", StreamParams::default(), |_| {})
            .unwrap();

        controller.set_move_success(false);
        let (tx, rx) = unbounded::<bool>();
        conn.move_capture_stream(slot, "other-source", move |success| {
            let _ = tx.send(success);
        })
        .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(false));
    }

    #[test]
    fn test_move_of_inactive_slot() {
        let (mut conn, _controller) = init();
        connect_and_wait(&mut conn);
        assert!(matches!(
            conn.move_playback_stream(PlaybackSlot(3), "x", |_| {}),
            Err(Error::InactiveSlot(3))
        ));
    }

    #[test]
    fn test_write_round_trip_preserves_counts_and_order() {
        let (mut conn, controller) = init();
        connect_and_wait(&mut conn);

        conn.create_playback_stream(None, "t", StreamParams::new(44100, 2, 4096), |buf| {
            buf.fill(0xAB);
        })
        .unwrap();
        let stream = controller.stream_ids()[0];

        for nbytes in [4096_usize, 2048, 512] {
            controller.request_write(stream, nbytes);
        }
        wait_for(|| controller.writes().len() == 3);

        let writes = controller.writes();
        let lengths: Vec<usize> = writes.iter().map(|(_, data)| data.len()).collect();
        assert_eq!(lengths, vec![4096, 2048, 512]);
        for (id, data) in &writes {
            assert_eq!(*id, stream);
            assert!(data.iter().all(|&b| b == 0xAB));
        }
    }

    #[test]
    fn test_write_for_destroyed_stream_is_dropped() {
        let (mut conn, controller) = init();
        connect_and_wait(&mut conn);

        let slot = conn
            .create_playback_stream(None, "t", StreamParams::default(), |_| {})
            .unwrap();
        let stream = controller.stream_ids()[0];
        conn.destroy_playback_stream(slot).unwrap();

        // Stale readiness for a released stream is ignored, not a crash
        controller.request_write(stream, 1024);
        thread::sleep(Duration::from_millis(50));
        assert!(controller.writes().is_empty());
    }

    #[test]
    fn test_capture_chunk_delivery() {
        let (mut conn, controller) = init();
        connect_and_wait(&mut conn);

        let (tx, rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = unbounded();
        conn.create_capture_stream(None, "mic", StreamParams::new(16000, 1, 256), move |data| {
            let _ = tx.send(data.to_vec());
        })
        .unwrap();
        let stream = controller.stream_ids()[0];

        controller.push_capture_chunk(stream, vec![1, 2, 3, 4]);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)),
            Ok(vec![1, 2, 3, 4])
        );

        controller.push_capture_chunk(stream, vec![5, 6]);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(vec![5, 6]));
    }

    #[test]
    fn test_stream_connect_failure_keeps_slot_active() {
        let (mut conn, controller) = init();
        connect_and_wait(&mut conn);

        controller.refuse_stream_connect(true);
        let slot = conn
            .create_playback_stream(None, "t", StreamParams::default(), |_| {})
            .unwrap();

        // Compatibility: the slot stays active with an unconnected stream
        assert_eq!(conn.active_playback_streams(), 1);
        let record = controller.stream_record(controller.stream_ids()[0]).unwrap();
        assert!(!record.connected);

        conn.destroy_playback_stream(slot).unwrap();
    }

    #[test]
    fn test_invalid_params_rejected_before_allocation() {
        let (mut conn, controller) = init();
        connect_and_wait(&mut conn);

        let bad = StreamParams::new(48000, 0, 1024);
        assert!(matches!(
            conn.create_playback_stream(None, "t", bad, |_| {}),
            Err(Error::InvalidParams(_))
        ));
        assert!(controller.stream_ids().is_empty());
    }

    #[test]
    fn test_shutdown_releases_leftover_streams() {
        let (mut conn, controller) = init();
        connect_and_wait(&mut conn);
        conn.create_playback_stream(None, "t", StreamParams::default(), |_| {})
            .unwrap();

        drop(conn);

        let record = controller.stream_record(controller.stream_ids()[0]).unwrap();
        assert!(record.released);
        assert!(!controller.is_connected());
    }

    #[test]
    fn test_named_device_reaches_transport() {
        let (mut conn, controller) = init();
        connect_and_wait(&mut conn);

        conn.create_playback_stream(
            Some("front-speakers"),
            "music",
            StreamParams::default(),
            |_| {},
        )
        .unwrap();

        let record = controller.stream_record(controller.stream_ids()[0]).unwrap();
        assert_eq!(record.device.as_deref(), Some("front-speakers"));
        assert_eq!(record.label, "music");
    }
}
