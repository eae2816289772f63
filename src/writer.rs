//! Sinks for drained events: the [`FileWriter`] trait plus the stock
//! implementations used by sessions and tests.

use crate::event::ActivityId;
use crate::manager::SequencePoint;
use crate::record::EventView;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::{self, Write};
use std::sync::Arc;

/// Delivery metadata the reader attaches to each emitted event, alongside the
/// record itself.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EventMeta {
    pub thread_id: u64,
    /// The writing thread's attempted-write number for this record. Gaps
    /// between consecutive numbers from one thread are dropped events.
    pub sequence_number: u32,
    /// True for the first event after a sequence point (or session start).
    pub is_first_in_block: bool,
}

/// Destination for a drain pass. Implementations receive events in global
/// timestamp order, interleaved with sequence-point markers.
///
/// Called from whichever thread drives the drain, with no manager locks held;
/// a sink may block on IO without stalling producers.
pub trait FileWriter: Send {
    fn write_event(&mut self, event: &EventView<'_>, meta: &EventMeta) -> io::Result<()>;
    fn write_sequence_point(&mut self, point: &SequencePoint) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Discards everything. Useful for overhead measurement and for sessions that
/// only care about the side effects of tracing, not the output.
pub struct NullWriter;

impl FileWriter for NullWriter {
    fn write_event(&mut self, _event: &EventView<'_>, _meta: &EventMeta) -> io::Result<()> {
        Ok(())
    }

    fn write_sequence_point(&mut self, _point: &SequencePoint) -> io::Result<()> {
        Ok(())
    }
}

/// Owned copy of one drained event. [`EventView`] borrows from a buffer the
/// reader is about to advance past, so sinks that retain events copy into
/// this.
#[derive(Debug, Clone, Serialize)]
pub struct RecordedEvent {
    pub provider_id: u64,
    pub event_id: u32,
    pub version: u32,
    pub thread_id: u64,
    pub timestamp: u64,
    pub processor: u32,
    pub activity: Option<ActivityId>,
    pub related_activity: Option<ActivityId>,
    pub payload: Vec<u8>,
    pub stack: Vec<u64>,
    pub sequence_number: u32,
    pub is_first_in_block: bool,
}

impl RecordedEvent {
    pub fn from_view(view: &EventView<'_>, meta: &EventMeta) -> Self {
        Self {
            provider_id: view.provider_id,
            event_id: view.event_id,
            version: view.version,
            thread_id: view.thread_id,
            timestamp: view.timestamp,
            processor: view.processor,
            activity: view.activity,
            related_activity: view.related_activity,
            payload: view.payload.to_vec(),
            stack: view.stack_frames().collect(),
            sequence_number: meta.sequence_number,
            is_first_in_block: meta.is_first_in_block,
        }
    }
}

/// One entry in a [`MemoryWriter`], in the order the drain produced it.
#[derive(Debug, Clone)]
pub enum SinkItem {
    Event(RecordedEvent),
    SequencePoint(SequencePoint),
}

/// In-memory sink. Clones share the same backing store, so a test can hand
/// one handle to a session and inspect the other.
#[derive(Clone, Default)]
pub struct MemoryWriter {
    items: Arc<Mutex<Vec<SinkItem>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<SinkItem> {
        self.items.lock().clone()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.items
            .lock()
            .iter()
            .filter_map(|item| match item {
                SinkItem::Event(event) => Some(event.clone()),
                SinkItem::SequencePoint(_) => None,
            })
            .collect()
    }

    pub fn sequence_points(&self) -> Vec<SequencePoint> {
        self.items
            .lock()
            .iter()
            .filter_map(|item| match item {
                SinkItem::SequencePoint(point) => Some(point.clone()),
                SinkItem::Event(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl FileWriter for MemoryWriter {
    fn write_event(&mut self, event: &EventView<'_>, meta: &EventMeta) -> io::Result<()> {
        self.items
            .lock()
            .push(SinkItem::Event(RecordedEvent::from_view(event, meta)));
        Ok(())
    }

    fn write_sequence_point(&mut self, point: &SequencePoint) -> io::Result<()> {
        self.items.lock().push(SinkItem::SequencePoint(point.clone()));
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JsonRecord<'a> {
    Event(&'a RecordedEvent),
    SequencePoint(&'a SequencePoint),
}

/// Writes one JSON object per line, events and sequence points tagged by a
/// `kind` field.
pub struct JsonLinesWriter<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, record: &JsonRecord<'_>) -> io::Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")
    }
}

impl<W: Write + Send> FileWriter for JsonLinesWriter<W> {
    fn write_event(&mut self, event: &EventView<'_>, meta: &EventMeta) -> io::Result<()> {
        let owned = RecordedEvent::from_view(event, meta);
        self.write_line(&JsonRecord::Event(&owned))
    }

    fn write_sequence_point(&mut self, point: &SequencePoint) -> io::Result<()> {
        self.write_line(&JsonRecord::SequencePoint(point))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
