//! Stream Slot Pool
//!
//! Fixed-capacity registries of active streams, one table per direction.
//! Allocation is lowest-index-first over a linear scan; that order is an
//! observable policy (a destroyed low slot is reused before higher ones).
//!
//! Invariant: a slot holds a stream id if and only if it is active.

use sonance_transport::StreamId;

use crate::callback::MoveCallback;

/// Maximum concurrent streams per direction
pub const MAX_STREAMS: usize = 16;

/// Handle to an active playback stream slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSlot(pub(crate) usize);

impl PlaybackSlot {
    /// Slot index within the playback table (0..MAX_STREAMS)
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Handle to an active capture stream slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSlot(pub(crate) usize);

impl CaptureSlot {
    /// Slot index within the capture table (0..MAX_STREAMS)
    pub fn index(&self) -> usize {
        self.0
    }
}

/// One registry entry: stream handle plus its callback bindings
pub(crate) struct Slot<D> {
    pub stream: Option<StreamId>,
    pub active: bool,
    /// Data-ready binding (write callback for playback, read for capture)
    pub data_cb: Option<D>,
    /// Move-completion binding, present only while a move is pending
    pub move_cb: Option<MoveCallback>,
}

impl<D> Default for Slot<D> {
    fn default() -> Self {
        Self {
            stream: None,
            active: false,
            data_cb: None,
            move_cb: None,
        }
    }
}

/// Fixed table of [`MAX_STREAMS`] slots for one direction
pub(crate) struct SlotTable<D> {
    slots: [Slot<D>; MAX_STREAMS],
}

impl<D> SlotTable<D> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::default()),
        }
    }

    /// Index of the first free slot, scan order 0..MAX_STREAMS
    ///
    /// Does not mutate anything; the caller occupies the slot only once
    /// the transport stream has actually been allocated.
    pub fn find_free(&self) -> Option<usize> {
        self.slots.iter().position(|s| !s.active)
    }

    /// Mark a slot active and bind its stream and data callback
    pub fn occupy(&mut self, index: usize, stream: StreamId, data_cb: D) {
        let slot = &mut self.slots[index];
        debug_assert!(!slot.active, "occupying an active slot");
        slot.stream = Some(stream);
        slot.active = true;
        slot.data_cb = Some(data_cb);
        slot.move_cb = None;
    }

    /// Deactivate a slot, returning its stream id if it was active
    pub fn release(&mut self, index: usize) -> Option<StreamId> {
        let slot = self.slots.get_mut(index)?;
        if !slot.active {
            return None;
        }
        slot.active = false;
        slot.data_cb = None;
        slot.move_cb = None;
        slot.stream.take()
    }

    /// Mutable access to a slot, only while it is active
    pub fn get_active_mut(&mut self, index: usize) -> Option<&mut Slot<D>> {
        self.slots.get_mut(index).filter(|s| s.active)
    }

    /// Which slot (if any) owns the given stream id
    pub fn index_of_stream(&self, stream: StreamId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.active && s.stream == Some(stream))
    }

    /// Number of active slots
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    type TestTable = SlotTable<Box<dyn FnMut() + Send>>;

    fn noop() -> Box<dyn FnMut() + Send> {
        Box::new(|| {})
    }

    #[test]
    fn test_lowest_index_first() {
        let mut table = TestTable::new();
        assert_eq!(table.find_free(), Some(0));

        table.occupy(0, StreamId(10), noop());
        table.occupy(1, StreamId(11), noop());
        assert_eq!(table.find_free(), Some(2));

        // Freed low slot wins over the untouched higher ones
        table.release(0);
        assert_eq!(table.find_free(), Some(0));
    }

    #[test]
    fn test_capacity_exhaustion() {
        let mut table = TestTable::new();
        for i in 0..MAX_STREAMS {
            table.occupy(i, StreamId(i as u64), noop());
        }
        assert_eq!(table.find_free(), None);
        assert_eq!(table.active_count(), MAX_STREAMS);
    }

    #[test]
    fn test_release_is_idempotent_reporting() {
        let mut table = TestTable::new();
        table.occupy(3, StreamId(42), noop());

        assert_eq!(table.release(3), Some(StreamId(42)));
        // Second release finds an inactive slot
        assert_eq!(table.release(3), None);
        // Out-of-range index is a None, not a panic
        assert_eq!(table.release(MAX_STREAMS + 1), None);
    }

    #[test]
    fn test_stream_lookup_ignores_inactive() {
        let mut table = TestTable::new();
        table.occupy(2, StreamId(7), noop());
        assert_eq!(table.index_of_stream(StreamId(7)), Some(2));

        table.release(2);
        assert_eq!(table.index_of_stream(StreamId(7)), None);
    }

    #[test]
    fn test_active_invariant() {
        let mut table = TestTable::new();
        table.occupy(0, StreamId(1), noop());

        let slot = table.get_active_mut(0).unwrap();
        assert_eq!(slot.stream, Some(StreamId(1)));

        table.release(0);
        assert!(table.get_active_mut(0).is_none());
    }
}
