//! Events written from several threads come back as one stream sorted by
//! timestamp, with per-thread sequence numbers intact.

use eventpipe::{
    EventDescriptor, ManualClock, MemoryWriter, NullStackCapture, Session, SessionConfig,
};
use std::sync::Arc;
use std::thread;

fn manual_session(sink: MemoryWriter) -> (Arc<Session>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let session = Session::enable_with(
        SessionConfig::default(),
        Box::new(sink),
        clock.clone(),
        Arc::new(NullStackCapture),
    )
    .unwrap();
    (Arc::new(session), clock)
}

/// Each spawned thread writes its own slice of interleaved timestamps; the
/// drain must interleave them back into 1..=9.
#[test]
fn three_writers_drain_in_global_timestamp_order() {
    let sink = MemoryWriter::new();
    let (session, clock) = manual_session(sink.clone());
    let event = Arc::new(EventDescriptor::new(1, 1, 0));

    for timestamps in [[1u64, 4, 7], [2, 5, 8], [3, 6, 9]] {
        let session = session.clone();
        let clock = clock.clone();
        let event = event.clone();
        // Joined immediately so the manual clock stays coherent; the point is
        // three distinct writer threads, not racing wall clocks.
        thread::spawn(move || {
            for ts in timestamps {
                clock.set(ts);
                assert!(session.write_event(&*event, &ts.to_le_bytes(), None, None, None));
            }
        })
        .join()
        .unwrap();
    }

    assert_eq!(session.manager().thread_count(), 3);
    assert_eq!(session.flush_until(u64::MAX).unwrap(), 9);

    let timestamps: Vec<u64> = sink.events().iter().map(|e| e.timestamp).collect();
    assert_eq!(timestamps, (1..=9).collect::<Vec<u64>>());

    // Within each thread, sequence numbers count attempts from 1.
    for start in [1u64, 2, 3] {
        let sequences: Vec<u32> = sink
            .events()
            .iter()
            .filter(|e| e.timestamp % 3 == start % 3)
            .map(|e| e.sequence_number)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }
}

#[test]
fn incremental_flushes_cover_the_stream_without_overlap() {
    let sink = MemoryWriter::new();
    let (session, clock) = manual_session(sink.clone());
    let event = Arc::new(EventDescriptor::new(1, 1, 0));

    for timestamps in [[1u64, 4, 7], [2, 5, 8], [3, 6, 9]] {
        let session = session.clone();
        let clock = clock.clone();
        let event = event.clone();
        thread::spawn(move || {
            for ts in timestamps {
                clock.set(ts);
                assert!(session.write_event(&*event, &[], None, None, None));
            }
        })
        .join()
        .unwrap();
    }

    // Stop timestamps are exclusive: the first pass takes 1..=4, the second
    // picks up exactly where it left off.
    assert_eq!(session.flush_until(5).unwrap(), 4);
    assert_eq!(session.flush_until(u64::MAX).unwrap(), 5);
    let timestamps: Vec<u64> = sink.events().iter().map(|e| e.timestamp).collect();
    assert_eq!(timestamps, (1..=9).collect::<Vec<u64>>());
}

#[test]
fn single_thread_stream_is_append_ordered() {
    let sink = MemoryWriter::new();
    let (session, clock) = manual_session(sink.clone());
    let event = EventDescriptor::new(1, 1, 0);
    for ts in [10u64, 20, 30, 40] {
        clock.set(ts);
        assert!(session.write_event(&event, &[], None, None, None));
    }
    session.disable().unwrap();
    let timestamps: Vec<u64> = sink.events().iter().map(|e| e.timestamp).collect();
    assert_eq!(timestamps, vec![10, 20, 30, 40]);
}
