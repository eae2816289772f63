//! Per-thread byte arenas and the oldest-to-newest list that owns them.

use crate::record::{EventView, RecordInput};
use std::collections::VecDeque;

/// Two-phase buffer lifecycle. The transition is one-directional and is the
/// sole synchronization point between a producer thread and the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BufferState {
    Writable,
    ReadOnly,
}

/// A fixed-size byte arena that append-only packs event records.
///
/// Writes only ever advance the write cursor; nothing is overwritten. Once
/// converted to read-only the buffer never becomes writable again, and only
/// read-only buffers may be deleted.
pub(crate) struct Buffer {
    data: Box<[u8]>,
    write_cursor: usize,
    /// Valid only in the read-only phase.
    read_cursor: usize,
    records_written: u32,
    records_read: u32,
    state: BufferState,
    created_at: u64,
    /// The owning thread's attempted-write counter at creation time. Record
    /// sequence numbers within this buffer are derived from it.
    start_sequence: u32,
}

impl Buffer {
    pub(crate) fn new(capacity: usize, created_at: u64, start_sequence: u32) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            write_cursor: 0,
            read_cursor: 0,
            records_written: 0,
            records_read: 0,
            state: BufferState::Writable,
            created_at,
            start_sequence,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn created_at(&self) -> u64 {
        self.created_at
    }

    pub(crate) fn record_count(&self) -> u32 {
        self.records_written
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.state == BufferState::ReadOnly
    }

    /// Append one record, or return false without mutation if it does not fit.
    /// The caller holds the owning thread's lock.
    pub(crate) fn try_write(&mut self, input: &RecordInput<'_>) -> bool {
        debug_assert_eq!(self.state, BufferState::Writable, "write into sealed buffer");
        let size = input.size();
        if self.write_cursor + size > self.data.len() {
            return false;
        }
        crate::record::write_record(&mut self.data[self.write_cursor..], input);
        self.write_cursor += size;
        self.records_written += 1;
        true
    }

    /// Seal the buffer. Idempotent: a second call is a no-op and does not
    /// disturb the read cursor.
    pub(crate) fn convert_to_read_only(&mut self) {
        if self.state == BufferState::ReadOnly {
            return;
        }
        self.state = BufferState::ReadOnly;
        self.read_cursor = 0;
    }

    /// The record at the read cursor, if any. Read-only phase only.
    pub(crate) fn current_event(&self) -> Option<EventView<'_>> {
        debug_assert_eq!(self.state, BufferState::ReadOnly, "read from writable buffer");
        if self.read_cursor >= self.write_cursor {
            return None;
        }
        EventView::parse(&self.data[..self.write_cursor], self.read_cursor)
    }

    /// Advance past the current record by its aligned total size.
    pub(crate) fn move_next_read_record(&mut self) {
        debug_assert_eq!(self.state, BufferState::ReadOnly, "read from writable buffer");
        if let Some(view) = self.current_event() {
            let advance = view.total_len();
            self.read_cursor += advance;
            self.records_read += 1;
        }
    }

    /// Sequence number of the record at the read cursor. Records are numbered
    /// by the owning thread's attempted-write counter at the time they were
    /// written, so this is `start_sequence + records_read + 1`.
    pub(crate) fn current_sequence(&self) -> u32 {
        self.start_sequence.wrapping_add(self.records_read).wrapping_add(1)
    }

    /// True once the read cursor has consumed every record.
    pub(crate) fn is_drained(&self) -> bool {
        self.state == BufferState::ReadOnly && self.read_cursor >= self.write_cursor
    }
}

/// Oldest-to-newest list of sealed buffers for one (thread, session) pair.
///
/// The list exclusively owns its buffers. The reader may temporarily take the
/// head to drain it without holding the owning thread's lock, and pushes it
/// back front if a drain pass stops mid-buffer.
pub(crate) struct BufferList {
    buffers: VecDeque<Buffer>,
}

impl BufferList {
    pub(crate) fn new() -> Self {
        Self {
            buffers: VecDeque::new(),
        }
    }

    pub(crate) fn push_back(&mut self, buffer: Buffer) {
        self.buffers.push_back(buffer);
    }

    /// Re-insert a partially drained head taken by the reader.
    pub(crate) fn push_front(&mut self, buffer: Buffer) {
        debug_assert!(buffer.is_read_only());
        self.buffers.push_front(buffer);
    }

    /// Remove the oldest buffer. Only read-only buffers may leave the list.
    pub(crate) fn pop_front(&mut self) -> Option<Buffer> {
        debug_assert!(self.buffers.front().map_or(true, Buffer::is_read_only));
        self.buffers.pop_front()
    }

    pub(crate) fn front(&self) -> Option<&Buffer> {
        self.buffers.front()
    }

    pub(crate) fn len(&self) -> usize {
        self.buffers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
