//! The reader side: a k-way timestamp merge across every thread's buffer
//! list, plus sequence-point bookkeeping for streaming consumers.

use super::{BufferManager, ReaderState};
use crate::buffer::Buffer;
use crate::thread::ThreadSessionState;
use crate::writer::{EventMeta, FileWriter};
use parking_lot::MutexGuard;
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

/// A periodic marker recording, per producer thread, a lower-bound
/// write-attempt count and a wall timestamp. Streaming consumers use it to
/// bound how much unsorted data they must hold before emitting a sorted
/// prefix, and to detect drops via sequence-number gaps.
#[derive(Debug, Clone, Serialize)]
pub struct SequencePoint {
    pub timestamp: u64,
    /// thread id -> lower bound on that thread's attempted writes. Captured
    /// from relaxed counter reads at arm time and adjusted upward at emission
    /// if the drain delivered a higher sequence; a consumer must never see a
    /// false drop.
    pub thread_sequence_numbers: BTreeMap<u64, u32>,
}

impl SequencePoint {
    pub(crate) fn capture(timestamp: u64, threads: &[Arc<ThreadSessionState>]) -> Self {
        let thread_sequence_numbers = threads
            .iter()
            .map(|t| (t.thread_id(), t.sequence_lower_bound()))
            .collect();
        Self {
            timestamp,
            thread_sequence_numbers,
        }
    }
}

/// The reader's handle on one thread's buffer list during a drain pass.
///
/// The cursor temporarily owns the head buffer, so events are parsed and
/// handed to the sink without holding the producer's lock; the lock is only
/// taken to fetch the next head (sealing the writable buffer if the list is
/// otherwise empty) and to put an unfinished head back.
struct ThreadCursor {
    state: Arc<ThreadSessionState>,
    buffer: Option<Buffer>,
    /// Highest sequence number emitted from this thread during the pass.
    delivered: Option<u32>,
}

impl ThreadCursor {
    fn new(state: Arc<ThreadSessionState>) -> Self {
        Self {
            state,
            buffer: None,
            delivered: None,
        }
    }

    /// Timestamp of this thread's oldest unread event strictly before `stop`,
    /// advancing past drained buffers (freeing them) as needed.
    fn peek_timestamp(&mut self, manager: &BufferManager, stop: u64) -> Option<u64> {
        loop {
            if let Some(buffer) = self.buffer.as_ref() {
                match buffer.current_event() {
                    Some(view) if view.timestamp < stop => return Some(view.timestamp),
                    Some(_) => return None,
                    None => {
                        // Fully consumed; deletion requires ReadOnly, which
                        // every list member already is.
                        if let Some(drained) = self.buffer.take() {
                            manager.release_bytes(drained.capacity());
                        }
                    }
                }
            } else {
                let mut buffers = self.state.lock();
                if buffers.sealed.is_empty() {
                    let seal = buffers
                        .current
                        .as_ref()
                        .map_or(false, |b| b.created_at() < stop);
                    if seal {
                        if let Some(mut current) = buffers.current.take() {
                            current.convert_to_read_only();
                            buffers.sealed.push_back(current);
                        }
                    }
                }
                match buffers.sealed.front() {
                    // Buffers created at or after the stop timestamp are out
                    // of this pass; that bound keeps a drain from chasing a
                    // fast producer forever.
                    Some(head) if head.created_at() < stop => {
                        self.buffer = buffers.sealed.pop_front();
                    }
                    _ => return None,
                }
            }
        }
    }

    /// Emit the record at the cursor and advance. Runs without any lock; the
    /// cursor owns the buffer.
    fn emit_current(&mut self, sink: &mut dyn FileWriter, first_in_block: bool) -> io::Result<()> {
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(());
        };
        let sequence_number = buffer.current_sequence();
        if let Some(view) = buffer.current_event() {
            let meta = EventMeta {
                thread_id: self.state.thread_id(),
                sequence_number,
                is_first_in_block: first_in_block,
            };
            sink.write_event(&view, &meta)?;
        }
        buffer.move_next_read_record();
        self.delivered = Some(sequence_number);
        Ok(())
    }

    /// Return an unfinished head to its list (cursor position preserved) or
    /// free a drained one, and publish the delivered watermark.
    fn put_back(&mut self, manager: &BufferManager) {
        if let Some(buffer) = self.buffer.take() {
            if buffer.is_drained() {
                manager.release_bytes(buffer.capacity());
            } else {
                self.state.lock().sealed.push_front(buffer);
            }
        }
        if let Some(sequence) = self.delivered.take() {
            let mut buffers = self.state.lock();
            if (sequence.wrapping_sub(buffers.last_delivered_sequence) as i32) > 0 {
                buffers.last_delivered_sequence = sequence;
            }
        }
    }
}

impl BufferManager {
    /// Drain buffered events to `sink` in global timestamp order, up to but
    /// not including `stop_timestamp`, honoring sequence-point boundaries:
    /// every event strictly before a point's timestamp is flushed before the
    /// point itself is written.
    ///
    /// Single-reader discipline: calls are serialized internally and each one
    /// advances the shared read cursor; the sequence is not restartable.
    /// Returns the number of events emitted.
    pub fn consume_events_until(
        &self,
        stop_timestamp: u64,
        sink: &mut dyn FileWriter,
    ) -> io::Result<usize> {
        let mut reader = self.reader().lock();
        let mut total = 0usize;
        loop {
            let next_point = {
                self.state()
                    .lock()
                    .pending_sequence_points
                    .front()
                    .cloned()
            }
            .filter(|p| p.timestamp <= stop_timestamp);
            let segment_stop = next_point
                .as_ref()
                .map_or(stop_timestamp, |p| p.timestamp);

            total += self.drain_ordered(segment_stop, sink, &mut reader)?;

            let Some(mut point) = next_point else {
                break;
            };
            self.adjust_sequence_point(&mut point);
            sink.write_sequence_point(&point)?;
            self.state().lock().pending_sequence_points.pop_front();
            reader.first_in_block = true;
        }
        Ok(total)
    }

    /// One merge pass over all threads, bounded by `stop`.
    fn drain_ordered(
        &self,
        stop: u64,
        sink: &mut dyn FileWriter,
        reader: &mut MutexGuard<'_, ReaderState>,
    ) -> io::Result<usize> {
        let threads = { self.state().lock().threads.clone() };
        let mut cursors: SmallVec<[ThreadCursor; 8]> =
            threads.into_iter().map(ThreadCursor::new).collect();

        let result = self.merge_loop(&mut cursors, stop, sink, reader);
        // Unfinished heads go back even when the sink failed mid-pass, so no
        // buffer (or its budget) is lost.
        for cursor in cursors.iter_mut() {
            cursor.put_back(self);
        }
        result
    }

    fn merge_loop(
        &self,
        cursors: &mut [ThreadCursor],
        stop: u64,
        sink: &mut dyn FileWriter,
        reader: &mut MutexGuard<'_, ReaderState>,
    ) -> io::Result<usize> {
        let mut emitted = 0usize;
        loop {
            // Strictly smallest timestamp wins; equal timestamps fall back to
            // registry encounter order. True ties are a measurement-resolution
            // edge case, not an ordering promise.
            let mut best: Option<(usize, u64)> = None;
            for (index, cursor) in cursors.iter_mut().enumerate() {
                if let Some(timestamp) = cursor.peek_timestamp(self, stop) {
                    let better = best.map_or(true, |(_, b)| timestamp < b);
                    if better {
                        best = Some((index, timestamp));
                    }
                }
            }
            let Some((index, _)) = best else {
                return Ok(emitted);
            };
            cursors[index].emit_current(sink, reader.first_in_block)?;
            reader.first_in_block = false;
            emitted += 1;
        }
    }

    /// Raise the per-thread bounds in an armed point to any higher sequence
    /// the drain actually delivered: a thread may have advanced between arm
    /// time and drain time, and under-reporting here would show the consumer
    /// a false drop.
    fn adjust_sequence_point(&self, point: &mut SequencePoint) {
        let threads = { self.state().lock().threads.clone() };
        for state in threads {
            let delivered = state.lock().last_delivered_sequence;
            let entry = point
                .thread_sequence_numbers
                .entry(state.thread_id())
                .or_insert(0);
            if (delivered.wrapping_sub(*entry) as i32) > 0 {
                *entry = delivered;
            }
        }
    }
}
