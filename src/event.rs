use crate::stack::StackSnapshot;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// 128-bit activity-correlation id attached to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActivityId(pub [u8; 16]);

impl ActivityId {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// An event definition as seen by the tracing core.
///
/// Provider registries and metadata schemas live outside this crate; the core
/// only needs enough of an event to decide whether to record it, whether a
/// stack is wanted, and what identity to stamp on the record.
pub trait Event: Send + Sync {
    fn is_enabled(&self) -> bool;
    fn need_stack(&self) -> bool;
    fn provider_id(&self) -> u64;
    fn event_id(&self) -> u32;
    fn version(&self) -> u32;
    fn metadata(&self) -> &[u8];
}

/// Plain-struct [`Event`] implementation for tests and simple providers.
pub struct EventDescriptor {
    provider_id: u64,
    event_id: u32,
    version: u32,
    enabled: AtomicBool,
    need_stack: bool,
    metadata: Vec<u8>,
}

impl EventDescriptor {
    pub fn new(provider_id: u64, event_id: u32, version: u32) -> Self {
        Self {
            provider_id,
            event_id,
            version,
            enabled: AtomicBool::new(true),
            need_stack: false,
            metadata: Vec::new(),
        }
    }

    pub fn with_stack(mut self, need_stack: bool) -> Self {
        self.need_stack = need_stack;
        self
    }

    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Toggle the event on or off. Writes against a disabled event are not
    /// recorded and do not advance the writer's sequence counter.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

impl Event for EventDescriptor {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn need_stack(&self) -> bool {
        self.need_stack
    }

    fn provider_id(&self) -> u64 {
        self.provider_id
    }

    fn event_id(&self) -> u32 {
        self.event_id
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn metadata(&self) -> &[u8] {
        &self.metadata
    }
}

/// Stack-walking collaborator. Walking mechanics are out of scope for the
/// core; implementations must not panic across this boundary, and a failed
/// capture is reported as an empty snapshot (the record degrades to "no
/// stack", never a write failure).
pub trait StackCapture: Send + Sync {
    fn capture(&self) -> StackSnapshot;
}

/// Capture implementation that never produces frames.
pub struct NullStackCapture;

impl StackCapture for NullStackCapture {
    fn capture(&self) -> StackSnapshot {
        StackSnapshot::new()
    }
}
