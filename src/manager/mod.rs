//! Session-scoped buffer management: the producer write path, the global
//! memory budget, allocation policy, and the suspend/resume protocol.

mod merge;

pub use merge::SequencePoint;

use crate::clock::Clock;
use crate::event::{ActivityId, Event, StackCapture};
use crate::record::RecordInput;
use crate::stack::StackSnapshot;
use crate::thread::{self, ThreadSessionState};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(0);

/// Tuning knobs for one manager. [`crate::SessionConfig`] maps onto this.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Global byte budget across all per-thread buffers. Once exhausted the
    /// manager degrades by dropping events, never by blocking or growing.
    pub buffer_budget_bytes: usize,
    /// A sequence point is armed every time this many bytes have been
    /// allocated since the previous point. Allocation-driven on purpose:
    /// streaming consumers size their reorder window off allocation, not wall
    /// time.
    pub sequence_point_budget_bytes: usize,
    /// First-buffer size for a thread; the Nth buffer request is sized
    /// `base * N`, capped at `max_buffer_size`.
    pub base_buffer_size: usize,
    pub max_buffer_size: usize,
    /// Rundown sessions re-emit "as of now" state; their events never want a
    /// fresh stack, so capture is suppressed.
    pub rundown: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            buffer_budget_bytes: 4 * 1024 * 1024,
            sequence_point_budget_bytes: 1024 * 1024,
            base_buffer_size: 100 * 1024,
            max_buffer_size: 1024 * 1024,
            rundown: false,
        }
    }
}

pub(crate) struct ManagerState {
    pub(crate) threads: Vec<Arc<ThreadSessionState>>,
    pub(crate) allocated_bytes: usize,
    pub(crate) bytes_since_sequence_point: usize,
    pub(crate) pending_sequence_points: VecDeque<SequencePoint>,
}

pub(crate) struct ReaderState {
    /// True when the next emitted event opens a block (session start or the
    /// first event after a sequence point).
    pub(crate) first_in_block: bool,
}

/// The tracing core for one session.
///
/// Producers call [`write_event`](Self::write_event) concurrently; a single
/// reader drains via [`consume_events_until`](Self::consume_events_until).
/// Two locks, never held together by the same call: each thread's own lock
/// covers its buffers (the hot path), the manager lock covers the registry,
/// the budget, and sequence-point arming (allocation only). The reader takes
/// the manager lock to snapshot, releases it, then takes one thread lock at a
/// time — the strict non-overlap is what makes writer/reader deadlock
/// impossible.
pub struct BufferManager {
    id: u64,
    config: ManagerConfig,
    clock: Arc<dyn Clock>,
    stack_capture: Arc<dyn StackCapture>,
    /// While set, no new thread state or buffer may be created. This is the
    /// rendezvous that makes teardown safe.
    suspending: AtomicBool,
    dropped: AtomicU64,
    state: Mutex<ManagerState>,
    /// Serializes readers; `consume_events_until` is not reentrant.
    reader: Mutex<ReaderState>,
    /// Runs between buffer allocation and re-acquiring the thread lock, so
    /// tests can hold a writer inside that window while `suspend` races it.
    #[cfg(test)]
    allocation_hook: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl BufferManager {
    pub fn new(
        config: ManagerConfig,
        clock: Arc<dyn Clock>,
        stack_capture: Arc<dyn StackCapture>,
    ) -> Self {
        Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            config,
            clock,
            stack_capture,
            suspending: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            state: Mutex::new(ManagerState {
                threads: Vec::new(),
                allocated_bytes: 0,
                bytes_since_sequence_point: 0,
                pending_sequence_points: VecDeque::new(),
            }),
            reader: Mutex::new(ReaderState {
                first_in_block: true,
            }),
            #[cfg(test)]
            allocation_hook: Mutex::new(None),
        }
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Record one event occurrence for the calling thread.
    ///
    /// Returns true if the event was recorded. Every steady-state failure —
    /// disabled event, suspended session, exhausted budget — is a silent drop
    /// reported only through the return value; tracing must never be the
    /// reason an application thread observes a failure.
    pub fn write_event(
        &self,
        event: &dyn Event,
        payload: &[u8],
        activity: Option<ActivityId>,
        related_activity: Option<ActivityId>,
        stack: Option<&StackSnapshot>,
    ) -> bool {
        if !event.is_enabled() {
            // Not subscribed: no sequence increment, no lock taken.
            return false;
        }

        // Capture a stack before taking any lock; a failed capture degrades to
        // "no stack", never a write failure. Rundown events skip capture.
        let captured: Option<StackSnapshot> =
            if stack.is_none() && event.need_stack() && !self.config.rundown {
                let snapshot = self.stack_capture.capture();
                if snapshot.is_empty() {
                    None
                } else {
                    Some(snapshot)
                }
            } else {
                None
            };
        let stack = stack.or(captured.as_ref());

        let Some(state) = self.state_for_current_thread() else {
            // Suspending (or torn down): no state exists, nothing to count.
            self.count_drop();
            return false;
        };

        let mut input = RecordInput {
            provider_id: event.provider_id(),
            event_id: event.event_id(),
            version: event.version(),
            thread_id: state.thread_id(),
            processor: thread::current_processor(),
            timestamp: self.clock.now_ns(),
            activity,
            related_activity,
            payload,
            stack,
        };

        // Hot path: only the calling thread's own lock.
        {
            let mut buffers = state.lock();
            if self.suspending.load(Ordering::Acquire) {
                state.increment_sequence();
                drop(buffers);
                self.count_drop();
                return false;
            }
            if let Some(current) = buffers.current.as_mut() {
                if current.try_write(&input) {
                    state.increment_sequence();
                    return true;
                }
            }
        }

        // Full (or no buffer yet). Never allocate while holding the thread
        // lock: allocation needs the manager lock.
        let request = input.size();
        let Some(fresh) = self.allocate_buffer_for_thread(&state, request) else {
            state.increment_sequence();
            self.count_drop();
            return false;
        };

        #[cfg(test)]
        if let Some(hook) = self.allocation_hook.lock().as_ref() {
            hook();
        }

        let mut buffers = state.lock();
        if self.suspending.load(Ordering::Acquire) {
            // Suspension won the race; hand the budget back and drop.
            state.increment_sequence();
            drop(buffers);
            self.release_bytes(fresh.capacity());
            self.count_drop();
            return false;
        }
        if let Some(mut old) = buffers.current.take() {
            old.convert_to_read_only();
            buffers.sealed.push_back(old);
        }
        state.note_buffer_allocated();
        let mut fresh = fresh;
        // The attempt stalled for an allocation; re-stamp so the record is
        // never older than its buffer's creation time or a sequence point
        // armed during the allocation.
        input.timestamp = self.clock.now_ns();
        let recorded = fresh.try_write(&input);
        debug_assert!(recorded, "a fresh buffer is sized to fit the request");
        buffers.current = Some(fresh);
        state.increment_sequence();
        if !recorded {
            self.count_drop();
        }
        recorded
    }

    /// Resolve (or create) the calling thread's state for this manager.
    fn state_for_current_thread(&self) -> Option<Arc<ThreadSessionState>> {
        if let Some(state) = thread::cached_state(self.id) {
            return Some(state);
        }
        let state = {
            let mut manager = self.state.lock();
            if self.suspending.load(Ordering::Acquire) {
                return None;
            }
            let state = Arc::new(ThreadSessionState::new(thread::current_thread_id()));
            manager.threads.push(state.clone());
            state
        };
        thread::cache_state(self.id, state.clone());
        Some(state)
    }

    /// Allocate a buffer for `state` under the manager lock. Applies the
    /// geometric sizing policy, enforces the global budget, and arms a
    /// sequence point when cumulative allocation crosses the configured
    /// threshold. Returns `None` (drop) when suspending or out of budget.
    fn allocate_buffer_for_thread(
        &self,
        state: &Arc<ThreadSessionState>,
        request: usize,
    ) -> Option<crate::buffer::Buffer> {
        let mut manager = self.state.lock();
        if self.suspending.load(Ordering::Acquire) {
            return None;
        }

        let nth = state.buffers_allocated() as usize + 1;
        let geometric = self
            .config
            .base_buffer_size
            .saturating_mul(nth)
            .min(self.config.max_buffer_size);
        let mut size = geometric.max(request);

        let remaining = self
            .config
            .buffer_budget_bytes
            .saturating_sub(manager.allocated_bytes);
        if size > remaining {
            size = remaining;
        }
        if size < request {
            // Even the single record does not fit the remaining budget.
            return None;
        }

        manager.allocated_bytes += size;
        manager.bytes_since_sequence_point += size;
        if manager.bytes_since_sequence_point >= self.config.sequence_point_budget_bytes {
            manager.bytes_since_sequence_point = 0;
            let point = SequencePoint::capture(self.clock.now_ns(), &manager.threads);
            manager.pending_sequence_points.push_back(point);
        }

        trace!(
            thread_id = state.thread_id(),
            size,
            allocated = manager.allocated_bytes,
            "allocated trace buffer"
        );
        Some(crate::buffer::Buffer::new(
            size,
            self.clock.now_ns(),
            state.sequence_lower_bound(),
        ))
    }

    /// Credit bytes back to the budget after a buffer is freed. Never called
    /// while a thread lock is held.
    pub(crate) fn release_bytes(&self, bytes: usize) {
        let mut manager = self.state.lock();
        manager.allocated_bytes = manager.allocated_bytes.saturating_sub(bytes);
    }

    /// Stop all future writes and quiesce in-flight ones.
    ///
    /// The flag is published under the manager lock before any sealing, so no
    /// new thread state or buffer can be created afterwards. Each snapshotted
    /// thread is then sealed under its own lock, one at a time: a writer that
    /// raced ahead either installed its buffer before we reached its thread
    /// (we seal it here) or re-checks the flag under its own lock and
    /// discards. Either way, when this returns no writer holds a writable
    /// buffer the manager does not know about, and every thread's
    /// participation was O(1).
    pub fn suspend(&self) {
        let threads = {
            let manager = self.state.lock();
            self.suspending.store(true, Ordering::SeqCst);
            manager.threads.clone()
        };
        for state in threads {
            let mut buffers = state.lock();
            if let Some(mut current) = buffers.current.take() {
                current.convert_to_read_only();
                buffers.sealed.push_back(current);
            }
        }
        trace!(manager = self.id, "trace session suspended");
    }

    /// Re-admit writers. No per-thread coordination needed: writers simply
    /// observe the cleared flag on their next attempt.
    pub fn resume(&self) {
        self.suspending.store(false, Ordering::SeqCst);
    }

    pub fn is_suspending(&self) -> bool {
        self.suspending.load(Ordering::Acquire)
    }

    fn count_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Events deliberately not recorded since the manager was created.
    /// Consumers otherwise observe drops only as sequence-number gaps at
    /// sequence-point boundaries.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Bytes currently allocated across all buffers. Never exceeds the budget.
    pub fn allocated_bytes(&self) -> usize {
        self.state.lock().allocated_bytes
    }

    /// Number of producer threads that have written into this session.
    pub fn thread_count(&self) -> usize {
        self.state.lock().threads.len()
    }

    pub(crate) fn state(&self) -> &Mutex<ManagerState> {
        &self.state
    }

    pub(crate) fn reader(&self) -> &Mutex<ReaderState> {
        &self.reader
    }
}
