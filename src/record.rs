//! Packed record layout inside a buffer arena.
//!
//! Each record is a fixed header followed by payload bytes and then stack
//! frames, every section starting 8-byte aligned. The header carries the
//! record's total aligned size so a reader can scan a buffer by repeated
//! "skip current record, realign" without any out-of-band index.

use crate::event::ActivityId;
use crate::stack::StackSnapshot;

pub(crate) const HEADER_SIZE: usize = 88;

const OFF_TOTAL_LEN: usize = 0; // u32
const OFF_FLAGS: usize = 4; // u32
const OFF_PROVIDER_ID: usize = 8; // u64
const OFF_EVENT_ID: usize = 16; // u32
const OFF_VERSION: usize = 20; // u32
const OFF_THREAD_ID: usize = 24; // u64
const OFF_TIMESTAMP: usize = 32; // u64
const OFF_PROCESSOR: usize = 40; // u32
const OFF_PAYLOAD_LEN: usize = 44; // u32
const OFF_ACTIVITY: usize = 48; // [u8; 16]
const OFF_RELATED: usize = 64; // [u8; 16]
const OFF_STACK_LEN: usize = 80; // u32, frame count
// 84..88 reserved padding so the header stays 8-byte aligned.

const FLAG_ACTIVITY: u32 = 1;
const FLAG_RELATED: u32 = 1 << 1;

pub(crate) const fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Total aligned size of a record with the given payload and stack.
pub(crate) const fn record_size(payload_len: usize, stack_frames: usize) -> usize {
    align8(HEADER_SIZE + payload_len) + stack_frames * 8
}

/// Everything the writer stamps on a record, borrowed from the caller.
pub(crate) struct RecordInput<'a> {
    pub provider_id: u64,
    pub event_id: u32,
    pub version: u32,
    pub thread_id: u64,
    pub processor: u32,
    pub timestamp: u64,
    pub activity: Option<ActivityId>,
    pub related_activity: Option<ActivityId>,
    pub payload: &'a [u8],
    pub stack: Option<&'a StackSnapshot>,
}

impl RecordInput<'_> {
    pub(crate) fn size(&self) -> usize {
        record_size(self.payload.len(), self.stack.map_or(0, |s| s.len()))
    }
}

fn put_u32(dst: &mut [u8], off: usize, value: u32) {
    dst[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(dst: &mut [u8], off: usize, value: u64) {
    dst[off..off + 8].copy_from_slice(&value.to_le_bytes());
}

fn read_u32(src: &[u8], off: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&src[off..off + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(src: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&src[off..off + 8]);
    u64::from_le_bytes(bytes)
}

/// Pack one record at the start of `dst`. The caller has already checked that
/// `dst` is at least `input.size()` bytes. Returns the aligned total written.
pub(crate) fn write_record(dst: &mut [u8], input: &RecordInput<'_>) -> usize {
    let payload_len = input.payload.len();
    let stack_frames = input.stack.map_or(0, |s| s.len());
    let total = record_size(payload_len, stack_frames);
    debug_assert!(dst.len() >= total, "record must fit the remaining arena");

    let mut flags = 0u32;
    if input.activity.is_some() {
        flags |= FLAG_ACTIVITY;
    }
    if input.related_activity.is_some() {
        flags |= FLAG_RELATED;
    }

    put_u32(dst, OFF_TOTAL_LEN, total as u32);
    put_u32(dst, OFF_FLAGS, flags);
    put_u64(dst, OFF_PROVIDER_ID, input.provider_id);
    put_u32(dst, OFF_EVENT_ID, input.event_id);
    put_u32(dst, OFF_VERSION, input.version);
    put_u64(dst, OFF_THREAD_ID, input.thread_id);
    put_u64(dst, OFF_TIMESTAMP, input.timestamp);
    put_u32(dst, OFF_PROCESSOR, input.processor);
    put_u32(dst, OFF_PAYLOAD_LEN, payload_len as u32);
    let activity = input.activity.map_or([0u8; 16], |a| a.0);
    dst[OFF_ACTIVITY..OFF_ACTIVITY + 16].copy_from_slice(&activity);
    let related = input.related_activity.map_or([0u8; 16], |a| a.0);
    dst[OFF_RELATED..OFF_RELATED + 16].copy_from_slice(&related);
    put_u32(dst, OFF_STACK_LEN, stack_frames as u32);

    dst[HEADER_SIZE..HEADER_SIZE + payload_len].copy_from_slice(input.payload);
    if let Some(stack) = input.stack {
        let mut off = align8(HEADER_SIZE + payload_len);
        for &frame in stack.frames() {
            put_u64(dst, off, frame);
            off += 8;
        }
    }
    total
}

/// Borrowed view of one record inside its owning buffer.
///
/// Records are never copied out of the buffer during a drain; the read cursor
/// advances over them in place and the sink sees this view.
#[derive(Debug, Clone, Copy)]
pub struct EventView<'a> {
    pub provider_id: u64,
    pub event_id: u32,
    pub version: u32,
    pub thread_id: u64,
    pub timestamp: u64,
    pub processor: u32,
    pub activity: Option<ActivityId>,
    pub related_activity: Option<ActivityId>,
    pub payload: &'a [u8],
    stack_bytes: &'a [u8],
    total_len: usize,
}

impl<'a> EventView<'a> {
    /// Parse the record starting at `offset`. Returns `None` on a truncated or
    /// malformed header, which is unreachable through the write path.
    pub(crate) fn parse(data: &'a [u8], offset: usize) -> Option<EventView<'a>> {
        let rest = data.get(offset..)?;
        if rest.len() < HEADER_SIZE {
            return None;
        }
        let total_len = read_u32(rest, OFF_TOTAL_LEN) as usize;
        if total_len < HEADER_SIZE || total_len > rest.len() {
            return None;
        }
        let flags = read_u32(rest, OFF_FLAGS);
        let payload_len = read_u32(rest, OFF_PAYLOAD_LEN) as usize;
        let stack_frames = read_u32(rest, OFF_STACK_LEN) as usize;
        let stack_off = align8(HEADER_SIZE + payload_len);
        if stack_off + stack_frames * 8 > total_len {
            return None;
        }

        let activity = if flags & FLAG_ACTIVITY != 0 {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&rest[OFF_ACTIVITY..OFF_ACTIVITY + 16]);
            Some(ActivityId(bytes))
        } else {
            None
        };
        let related_activity = if flags & FLAG_RELATED != 0 {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&rest[OFF_RELATED..OFF_RELATED + 16]);
            Some(ActivityId(bytes))
        } else {
            None
        };

        Some(EventView {
            provider_id: read_u64(rest, OFF_PROVIDER_ID),
            event_id: read_u32(rest, OFF_EVENT_ID),
            version: read_u32(rest, OFF_VERSION),
            thread_id: read_u64(rest, OFF_THREAD_ID),
            timestamp: read_u64(rest, OFF_TIMESTAMP),
            processor: read_u32(rest, OFF_PROCESSOR),
            activity,
            related_activity,
            payload: &rest[HEADER_SIZE..HEADER_SIZE + payload_len],
            stack_bytes: &rest[stack_off..stack_off + stack_frames * 8],
            total_len,
        })
    }

    pub fn stack_len(&self) -> usize {
        self.stack_bytes.len() / 8
    }

    /// Captured stack frames, leaf first.
    pub fn stack_frames(&self) -> impl Iterator<Item = u64> + 'a {
        self.stack_bytes.chunks_exact(8).map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            u64::from_le_bytes(bytes)
        })
    }

    pub(crate) fn total_len(&self) -> usize {
        self.total_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input<'a>(payload: &'a [u8], stack: Option<&'a StackSnapshot>) -> RecordInput<'a> {
        RecordInput {
            provider_id: 0xAABB,
            event_id: 9,
            version: 2,
            thread_id: 77,
            processor: 3,
            timestamp: 123_456,
            activity: Some(ActivityId([1; 16])),
            related_activity: None,
            payload,
            stack,
        }
    }

    #[test]
    fn header_size_is_aligned() {
        assert_eq!(HEADER_SIZE % 8, 0);
        assert_eq!(record_size(0, 0), HEADER_SIZE);
        assert_eq!(record_size(1, 0), HEADER_SIZE + 8);
        assert_eq!(record_size(8, 2), HEADER_SIZE + 8 + 16);
    }

    #[test]
    fn write_then_parse_round_trip() {
        let mut stack = StackSnapshot::new();
        stack.append(0x10);
        stack.append(0x20);
        let payload = [5u8, 6, 7];
        let input = sample_input(&payload, Some(&stack));

        let mut arena = vec![0u8; input.size()];
        let written = write_record(&mut arena, &input);
        assert_eq!(written, input.size());

        let view = EventView::parse(&arena, 0).expect("well-formed record");
        assert_eq!(view.provider_id, 0xAABB);
        assert_eq!(view.event_id, 9);
        assert_eq!(view.version, 2);
        assert_eq!(view.thread_id, 77);
        assert_eq!(view.processor, 3);
        assert_eq!(view.timestamp, 123_456);
        assert_eq!(view.activity, Some(ActivityId([1; 16])));
        assert_eq!(view.related_activity, None);
        assert_eq!(view.payload, &payload);
        assert_eq!(view.stack_frames().collect::<Vec<_>>(), vec![0x10, 0x20]);
        assert_eq!(view.total_len(), written);
    }

    #[test]
    fn parse_rejects_truncated_data() {
        assert!(EventView::parse(&[0u8; 10], 0).is_none());
        assert!(EventView::parse(&[], 4).is_none());
    }

    mod packing_proptest {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn round_trips_any_payload_and_stack(
                payload in prop::collection::vec(any::<u8>(), 0..512),
                frames in prop::collection::vec(any::<u64>(), 0..120),
                has_activity in any::<bool>(),
            ) {
                let mut stack = StackSnapshot::new();
                for &frame in &frames {
                    stack.append(frame);
                }
                let input = RecordInput {
                    provider_id: 1,
                    event_id: 2,
                    version: 0,
                    thread_id: 3,
                    processor: 0,
                    timestamp: 42,
                    activity: has_activity.then(|| ActivityId([9; 16])),
                    related_activity: None,
                    payload: &payload,
                    stack: if frames.is_empty() { None } else { Some(&stack) },
                };
                let mut arena = vec![0u8; input.size()];
                let written = write_record(&mut arena, &input);
                prop_assert_eq!(written % 8, 0);

                let view = EventView::parse(&arena, 0).unwrap();
                prop_assert_eq!(view.payload, &payload[..]);
                // Frames beyond MAX_STACK_DEPTH were truncated at capture time.
                let expected: Vec<u64> =
                    frames.iter().copied().take(crate::stack::MAX_STACK_DEPTH).collect();
                let got: Vec<u64> = view.stack_frames().collect();
                prop_assert_eq!(got, if frames.is_empty() { vec![] } else { expected });
            }
        }
    }
}
