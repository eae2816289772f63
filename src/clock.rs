use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Monotonic time source shared by every timestamp in a session.
///
/// Buffer creation times, record timestamps, and sequence-point times must all
/// come from the same clock, or the merge order reconstructed at drain time is
/// meaningless.
pub trait Clock: Send + Sync {
    /// Nanoseconds since an arbitrary fixed origin. Must never go backwards.
    fn now_ns(&self) -> u64;

    /// Ticks per second of the underlying counter.
    fn frequency(&self) -> u64 {
        NANOS_PER_SEC
    }
}

/// Wall-clock-independent monotonic clock anchored at creation time.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Settable clock for deterministic tests.
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ns),
        }
    }

    pub fn set(&self, ns: u64) {
        self.now.store(ns, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ns: u64) {
        self.now.fetch_add(delta_ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
