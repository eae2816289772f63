//! Per-(thread, session) bookkeeping and the per-thread lock discipline.

use crate::buffer::{Buffer, BufferList};
use parking_lot::{Mutex, MutexGuard};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// State the manager keeps for one producer thread within one session.
///
/// The embedded mutex is the thread's per-thread lock for this session: the
/// hot write path only ever takes the calling thread's own instance, so the
/// common case carries no cross-thread contention. Ownership is shared between
/// the producer thread's thread-local cache and the manager's registry via
/// `Arc`; whichever side releases last frees the state, which is what keeps a
/// mid-drain reader safe against the owning thread exiting.
pub struct ThreadSessionState {
    thread_id: u64,
    /// Attempted-write counter, bumped exactly once per write attempt whether
    /// the event was recorded or dropped. Bumped under this thread's lock on
    /// every path that holds it; the budget-refusal path bumps it lock-free,
    /// which the atomic permits because readers only take relaxed loads. It is
    /// a lower bound on attempts as of some wall time, never a precise
    /// delivered-event count. Wrapping on overflow is fine because it is only
    /// ever used as a relative bound.
    sequence: AtomicU32,
    buffers_allocated: AtomicU32,
    inner: Mutex<ThreadBuffers>,
}

pub(crate) struct ThreadBuffers {
    /// The thread's single writable buffer, if any.
    pub(crate) current: Option<Buffer>,
    /// Sealed (read-only) buffers, oldest first.
    pub(crate) sealed: BufferList,
    /// Highest sequence number the reader has delivered from this thread.
    /// Feeds the upward adjustment of sequence points at emission time.
    pub(crate) last_delivered_sequence: u32,
}

impl ThreadSessionState {
    pub(crate) fn new(thread_id: u64) -> Self {
        Self {
            thread_id,
            sequence: AtomicU32::new(0),
            buffers_allocated: AtomicU32::new(0),
            inner: Mutex::new(ThreadBuffers {
                current: None,
                sealed: BufferList::new(),
                last_delivered_sequence: 0,
            }),
        }
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    /// Bump the attempted-write counter. Called exactly once per attempt,
    /// under this thread's lock except on the budget-refusal path. Returns
    /// the new value.
    pub(crate) fn increment_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Relaxed read of the attempted-write counter; a lower bound only.
    pub(crate) fn sequence_lower_bound(&self) -> u32 {
        self.sequence.load(Ordering::Relaxed)
    }

    pub(crate) fn buffers_allocated(&self) -> u32 {
        self.buffers_allocated.load(Ordering::Relaxed)
    }

    /// Called when a buffer is installed, not when it is allocated, so a
    /// buffer discarded in the suspend race never advances geometric sizing.
    pub(crate) fn note_buffer_allocated(&self) {
        self.buffers_allocated.fetch_add(1, Ordering::Relaxed);
    }

    /// Acquire this thread's per-thread lock.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ThreadBuffers> {
        self.inner.lock()
    }
}

thread_local! {
    /// Cache of (manager id, state) pairs for the calling thread, so the write
    /// hot path resolves its state without touching the manager lock.
    static SESSION_STATES: RefCell<Vec<(u64, Arc<ThreadSessionState>)>> =
        const { RefCell::new(Vec::new()) };
}

pub(crate) fn cached_state(manager_id: u64) -> Option<Arc<ThreadSessionState>> {
    SESSION_STATES.with(|states| {
        states
            .borrow()
            .iter()
            .find(|(id, _)| *id == manager_id)
            .map(|(_, state)| state.clone())
    })
}

pub(crate) fn cache_state(manager_id: u64, state: Arc<ThreadSessionState>) {
    SESSION_STATES.with(|states| {
        let mut states = states.borrow_mut();
        // Prune entries whose manager has torn down its registry; the cache is
        // then the only remaining owner.
        states.retain(|(_, s)| Arc::strong_count(s) > 1);
        states.push((manager_id, state));
    });
}

/// OS thread id of the calling thread.
#[cfg(target_os = "linux")]
pub(crate) fn current_thread_id() -> u64 {
    // SAFETY: SYS_gettid takes no arguments and always succeeds; unsafe is
    // required because syscall() is a raw FFI function with no type checking.
    (unsafe { libc::syscall(libc::SYS_gettid) }) as u64
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn current_thread_id() -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

/// Processor the calling thread is running on, best effort.
#[cfg(target_os = "linux")]
pub(crate) fn current_processor() -> u32 {
    // SAFETY: sched_getcpu has no preconditions; a negative return means the
    // kernel does not support it, in which case we report processor 0.
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 {
        0
    } else {
        cpu as u32
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn current_processor() -> u32 {
    0
}
