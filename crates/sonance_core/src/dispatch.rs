//! Callback Marshaling
//!
//! Translates transport events into typed host notifications. Every
//! handler runs on the event-loop thread with the shared lock held, so a
//! host callback may synchronously issue further manager commands; the
//! interior `RefCell` borrow is released before each callback fires
//! (the binding is taken out of its slot), with the one exception of the
//! capture read callback, which holds a chunk borrowed from the transport
//! for the duration of the call.

use std::cell::RefCell;

use tracing::{debug, warn};

use sonance_transport::{ConnectionState, DeviceInfo, StreamId, TransportEvent};

use crate::callback::DeviceCallback;
use crate::connection::{Inner, SharedInner};

/// Maximum device name length handed to the host, in characters
pub const DEVICE_NAME_MAX: usize = 127;

/// Maximum device description length handed to the host, in characters
pub const DEVICE_DESC_MAX: usize = 255;

/// Dispatch one transport event into at most one host notification
pub(crate) fn handle_event(inner: &SharedInner, event: TransportEvent) {
    let guard = inner.lock();
    let cell: &RefCell<Inner> = &guard;
    match event {
        TransportEvent::StateChanged(state) => on_state_changed(cell, state),
        TransportEvent::PlaybackDevice(entry) => {
            on_device_entry(cell, entry, |st| &mut st.on_playback_device)
        }
        TransportEvent::CaptureDevice(entry) => {
            on_device_entry(cell, entry, |st| &mut st.on_capture_device)
        }
        TransportEvent::WriteReady { stream, nbytes } => on_write_ready(cell, stream, nbytes),
        TransportEvent::ReadReady { stream } => on_read_ready(cell, stream),
        TransportEvent::MoveComplete { stream, success } => {
            on_move_complete(cell, stream, success)
        }
    }
}

fn on_state_changed(cell: &RefCell<Inner>, state: ConnectionState) {
    let cb = {
        let mut st = cell.borrow_mut();
        st.state = state;
        st.on_state.take()
    };
    debug!(?state, "connection state changed");
    if let Some(mut cb) = cb {
        cb(state);
        let mut st = cell.borrow_mut();
        // Keep the registration unless the callback replaced it
        if st.on_state.is_none() {
            st.on_state = Some(cb);
        }
    }
}

fn on_device_entry(
    cell: &RefCell<Inner>,
    entry: Option<DeviceInfo>,
    select: fn(&mut Inner) -> &mut Option<DeviceCallback>,
) {
    let entry = entry.map(clamp_device);
    let mut cb = {
        let mut st = cell.borrow_mut();
        match select(&mut st).take() {
            Some(cb) => cb,
            None => {
                debug!("device listing result with no registered callback");
                return;
            }
        }
    };

    let end_of_list = entry.is_none();
    cb(entry.as_ref());

    // The registration is one-shot per listing: cleared after end-of-list
    if !end_of_list {
        let mut st = cell.borrow_mut();
        let binding = select(&mut st);
        if binding.is_none() {
            *binding = Some(cb);
        }
    }
}

fn on_write_ready(cell: &RefCell<Inner>, stream: StreamId, nbytes: usize) {
    let (index, mut cb, mut buf) = {
        let mut st = cell.borrow_mut();
        let Some(index) = st.playback.index_of_stream(stream) else {
            debug!(%stream, "write request for unknown stream");
            return;
        };
        let mut buf: Vec<u8> = Vec::new();
        if buf.try_reserve_exact(nbytes).is_err() {
            // Degenerate case: skip this cycle, nothing is written
            debug!(nbytes, "buffer allocation failed, dropping write cycle");
            return;
        }
        buf.resize(nbytes, 0);
        let Some(cb) = st
            .playback
            .get_active_mut(index)
            .and_then(|s| s.data_cb.take())
        else {
            return;
        };
        (index, cb, buf)
    };

    // Borrow released: the callback owns the buffer for exactly this call
    // and may re-enter the manager
    cb(&mut buf);

    let mut st = cell.borrow_mut();
    let inner = &mut *st;
    match inner.playback.get_active_mut(index) {
        Some(slot) if slot.stream == Some(stream) => {
            if slot.data_cb.is_none() {
                slot.data_cb = Some(cb);
            }
            if let Err(e) = inner.transport.write(stream, buf) {
                warn!(%stream, error = %e, "failed to submit playback buffer");
            }
        }
        _ => debug!(%stream, "stream destroyed during write callback"),
    }
}

fn on_read_ready(cell: &RefCell<Inner>, stream: StreamId) {
    let mut st = cell.borrow_mut();
    let inner = &mut *st;
    let Some(index) = inner.capture.index_of_stream(stream) else {
        debug!(%stream, "read notification for unknown stream");
        return;
    };
    let Some(slot) = inner.capture.get_active_mut(index) else {
        return;
    };
    let Some(cb) = slot.data_cb.as_mut() else {
        return;
    };
    if let Some(data) = inner.transport.peek(stream) {
        // Borrowed view, owned by the transport; valid only for this call
        cb(data);
        inner.transport.advance(stream);
    }
}

fn on_move_complete(cell: &RefCell<Inner>, stream: StreamId, success: bool) {
    let cb = {
        let mut st = cell.borrow_mut();
        let inner = &mut *st;
        let from_playback = inner
            .playback
            .index_of_stream(stream)
            .and_then(|i| inner.playback.get_active_mut(i))
            .and_then(|s| s.move_cb.take());
        match from_playback {
            Some(cb) => Some(cb),
            None => inner
                .capture
                .index_of_stream(stream)
                .and_then(|i| inner.capture.get_active_mut(i))
                .and_then(|s| s.move_cb.take()),
        }
    };
    match cb {
        // FnOnce taken out of the slot: fires exactly once per issued move
        Some(cb) => cb(success),
        None => debug!(%stream, success, "move completion with no pending callback"),
    }
}

/// Bound name/description to the fixed descriptor capacities
///
/// Overlong strings are truncated on a character boundary, never rejected.
fn clamp_device(mut info: DeviceInfo) -> DeviceInfo {
    info.name = truncate_chars(info.name, DEVICE_NAME_MAX);
    info.description = truncate_chars(info.description, DEVICE_DESC_MAX);
    info
}

fn truncate_chars(s: String, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_index, _)) => {
            let mut s = s;
            s.truncate(byte_index);
            s
        }
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_leaves_short_strings() {
        assert_eq!(truncate_chars("speakers".into(), DEVICE_NAME_MAX), "speakers");
        assert_eq!(truncate_chars(String::new(), DEVICE_NAME_MAX), "");
    }

    #[test]
    fn test_truncate_counts_characters() {
        let long = "x".repeat(500);
        assert_eq!(truncate_chars(long, DEVICE_NAME_MAX).len(), 127);

        // Multi-byte characters are counted as one and never split
        let long = "é".repeat(500);
        let cut = truncate_chars(long, DEVICE_NAME_MAX);
        assert_eq!(cut.chars().count(), 127);
        assert!(cut.is_char_boundary(cut.len()));
    }

    #[test]
    fn test_clamp_device_bounds_both_fields() {
        let info = DeviceInfo {
            index: 9,
            name: "n".repeat(300),
            description: "d".repeat(300),
            sample_rate: 48000,
            channels: 2,
        };
        let clamped = clamp_device(info);
        assert_eq!(clamped.index, 9);
        assert_eq!(clamped.name.chars().count(), DEVICE_NAME_MAX);
        assert_eq!(clamped.description.chars().count(), DEVICE_DESC_MAX);
    }
}
