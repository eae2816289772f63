//! Budget enforcement and suspend behavior under real thread interleavings.

use eventpipe::{
    BufferManager, EventDescriptor, ManagerConfig, ManualClock, MemoryWriter, MonotonicClock,
    NullStackCapture, NullWriter, Session, SessionConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn manager(config: ManagerConfig) -> Arc<BufferManager> {
    Arc::new(BufferManager::new(
        config,
        Arc::new(ManualClock::new(0)),
        Arc::new(NullStackCapture),
    ))
}

/// With budget for exactly one single-record buffer, two racing writers end
/// with one recorded event and one drop, whichever thread wins.
#[test]
fn budget_admits_exactly_one_of_two_racing_writers() {
    // One 16-byte-payload record occupies 104 bytes; 150 fits one buffer that
    // holds a single record, and leaves too little for a second buffer.
    let budget = 150;
    let manager = manager(ManagerConfig {
        buffer_budget_bytes: budget,
        sequence_point_budget_bytes: usize::MAX,
        base_buffer_size: budget,
        max_buffer_size: budget,
        rundown: false,
    });
    let event = Arc::new(EventDescriptor::new(1, 1, 0));
    let barrier = Arc::new(Barrier::new(2));
    let recorded = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let manager = manager.clone();
            let event = event.clone();
            let barrier = barrier.clone();
            let recorded = recorded.clone();
            thread::spawn(move || {
                barrier.wait();
                if manager.write_event(&*event, &[0u8; 16], None, None, None) {
                    recorded.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(recorded.load(Ordering::Relaxed), 1);
    assert_eq!(manager.dropped_events(), 1);
    assert!(manager.allocated_bytes() <= budget);
}

/// After suspend returns, no thread can record and no new thread state
/// appears, including threads the manager has never seen before.
#[test]
fn suspend_quiesces_current_and_future_writers() {
    let manager = manager(ManagerConfig::default());
    let event = Arc::new(EventDescriptor::new(1, 1, 0));

    for _ in 0..2 {
        let manager = manager.clone();
        let event = event.clone();
        thread::spawn(move || {
            assert!(manager.write_event(&*event, b"before", None, None, None));
        })
        .join()
        .unwrap();
    }
    assert_eq!(manager.thread_count(), 2);

    manager.suspend();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            let event = event.clone();
            thread::spawn(move || manager.write_event(&*event, b"after", None, None, None))
        })
        .collect();
    for handle in handles {
        assert!(!handle.join().unwrap());
    }
    // Fresh threads were refused state, known threads were refused writes.
    assert_eq!(manager.thread_count(), 2);

    manager.resume();
    assert!(manager.write_event(&*event, b"resumed", None, None, None));
}

/// Hammer a session from many threads, then account for every attempt: each
/// one was either delivered to the sink or counted as dropped, and the sink
/// saw timestamps in non-decreasing order.
#[test]
fn every_attempt_is_delivered_or_counted_dropped() {
    const THREADS: usize = 8;
    const WRITES: usize = 500;

    let sink = MemoryWriter::new();
    let session = Arc::new(
        Session::enable_with(
            SessionConfig {
                // Small enough that drops actually happen under load.
                buffer_budget_bytes: 64 * 1024,
                ..SessionConfig::default()
            },
            Box::new(sink.clone()),
            Arc::new(MonotonicClock::new()),
            Arc::new(NullStackCapture),
        )
        .unwrap(),
    );
    let event = Arc::new(EventDescriptor::new(1, 1, 0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let session = session.clone();
            let event = event.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut recorded = 0usize;
                for i in 0..WRITES {
                    let payload = (i as u64).to_le_bytes();
                    if session.write_event(&*event, &payload, None, None, None) {
                        recorded += 1;
                    }
                }
                recorded
            })
        })
        .collect();
    let recorded: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    session.disable().unwrap();
    assert_eq!(sink.events().len(), recorded);
    assert_eq!(
        recorded as u64 + session.dropped_events(),
        (THREADS * WRITES) as u64
    );

    let timestamps: Vec<u64> = sink.events().iter().map(|e| e.timestamp).collect();
    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
}

/// Writers keep succeeding while a reader drains concurrently, and the
/// combined accounting still holds.
#[test]
fn concurrent_flush_does_not_stall_writers() {
    let sink = MemoryWriter::new();
    let session = Arc::new(
        Session::enable_with(
            SessionConfig::default(),
            Box::new(sink.clone()),
            Arc::new(MonotonicClock::new()),
            Arc::new(NullStackCapture),
        )
        .unwrap(),
    );
    let event = Arc::new(EventDescriptor::new(1, 1, 0));

    let writer = {
        let session = session.clone();
        let event = event.clone();
        thread::spawn(move || {
            let mut recorded = 0usize;
            for _ in 0..2000 {
                if session.write_event(&*event, b"payload", None, None, None) {
                    recorded += 1;
                }
            }
            recorded
        })
    };
    let flusher = {
        let session = session.clone();
        thread::spawn(move || {
            for _ in 0..20 {
                session.flush().unwrap();
            }
        })
    };

    let recorded = writer.join().unwrap();
    flusher.join().unwrap();
    session.disable().unwrap();
    assert_eq!(sink.events().len() as u64, recorded as u64);
    assert_eq!(session.dropped_events(), 2000 - recorded as u64);
}

/// Suspend on a quiet session leaves nothing behind for the drain to lose.
#[test]
fn suspend_then_drain_delivers_everything_buffered() {
    let manager = manager(ManagerConfig::default());
    let event = EventDescriptor::new(1, 1, 0);
    for _ in 0..5 {
        assert!(manager.write_event(&event, &[], None, None, None));
    }
    manager.suspend();
    let mut sink = NullWriter;
    assert_eq!(manager.consume_events_until(u64::MAX, &mut sink).unwrap(), 5);
    assert_eq!(manager.allocated_bytes(), 0);
}
