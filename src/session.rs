//! Session lifecycle: enable, trace, flush, disable.

use crate::clock::{Clock, MonotonicClock};
use crate::event::{ActivityId, Event, NullStackCapture, StackCapture};
use crate::manager::{BufferManager, ManagerConfig};
use crate::stack::StackSnapshot;
use crate::writer::FileWriter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// How a session's output is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Drained on demand and at disable; the sink sees the whole trace.
    File,
    /// Drained incrementally by a consumer that relies on sequence points to
    /// bound its reorder window.
    Streaming,
}

/// Per-session tuning. Maps onto [`ManagerConfig`] at enable time.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub buffer_budget_bytes: usize,
    pub sequence_point_budget_bytes: usize,
    /// Rundown sessions re-emit current state; stack capture is suppressed.
    pub rundown: bool,
    pub kind: SessionKind,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let defaults = ManagerConfig::default();
        Self {
            buffer_budget_bytes: defaults.buffer_budget_bytes,
            sequence_point_budget_bytes: defaults.sequence_point_budget_bytes,
            rundown: false,
            kind: SessionKind::File,
        }
    }
}

impl SessionConfig {
    fn validate(&self) -> Result<(), SessionError> {
        if self.buffer_budget_bytes == 0 {
            return Err(SessionError::InvalidConfig("buffer budget must be nonzero"));
        }
        if self.sequence_point_budget_bytes == 0 {
            return Err(SessionError::InvalidConfig(
                "sequence point budget must be nonzero",
            ));
        }
        Ok(())
    }

    fn to_manager_config(&self) -> ManagerConfig {
        let defaults = ManagerConfig::default();
        ManagerConfig {
            buffer_budget_bytes: self.buffer_budget_bytes,
            sequence_point_budget_bytes: self.sequence_point_budget_bytes,
            base_buffer_size: defaults.base_buffer_size.min(self.buffer_budget_bytes),
            max_buffer_size: defaults.max_buffer_size.min(self.buffer_budget_bytes),
            rundown: self.rundown,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is disabled")]
    Disabled,
    #[error("invalid session configuration: {0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One enabled tracing session: a [`BufferManager`] bound to an output sink.
///
/// Producers write through [`write_event`](Self::write_event) from any thread.
/// Flushing and disabling drive the manager's single reader; the writer mutex
/// serializes them against each other, not against producers.
pub struct Session {
    manager: BufferManager,
    writer: Mutex<Box<dyn FileWriter>>,
    enabled: AtomicBool,
    kind: SessionKind,
}

impl Session {
    /// Start a session with the monotonic clock and no stack walking.
    pub fn enable(
        config: SessionConfig,
        writer: Box<dyn FileWriter>,
    ) -> Result<Self, SessionError> {
        Self::enable_with(
            config,
            writer,
            Arc::new(MonotonicClock::new()),
            Arc::new(NullStackCapture),
        )
    }

    /// Start a session with an explicit clock and stack-capture collaborator.
    pub fn enable_with(
        config: SessionConfig,
        writer: Box<dyn FileWriter>,
        clock: Arc<dyn Clock>,
        stack_capture: Arc<dyn StackCapture>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let kind = config.kind;
        let manager = BufferManager::new(config.to_manager_config(), clock, stack_capture);
        debug!(?kind, budget = config.buffer_budget_bytes, "trace session enabled");
        Ok(Self {
            manager,
            writer: Mutex::new(writer),
            enabled: AtomicBool::new(true),
            kind,
        })
    }

    /// Record one event. Returns true if it was buffered; a disabled session
    /// drops silently, like every other steady-state failure on this path.
    pub fn write_event(
        &self,
        event: &dyn Event,
        payload: &[u8],
        activity: Option<ActivityId>,
        related_activity: Option<ActivityId>,
        stack: Option<&StackSnapshot>,
    ) -> bool {
        if !self.enabled.load(Ordering::Acquire) {
            return false;
        }
        self.manager
            .write_event(event, payload, activity, related_activity, stack)
    }

    /// Drain everything buffered so far to the sink, in global timestamp
    /// order. Returns the number of events emitted.
    pub fn flush(&self) -> Result<usize, SessionError> {
        self.flush_until(self.manager.clock().now_ns())
    }

    /// Drain events with timestamps strictly before `stop_timestamp`.
    pub fn flush_until(&self, stop_timestamp: u64) -> Result<usize, SessionError> {
        if !self.enabled.load(Ordering::Acquire) {
            return Err(SessionError::Disabled);
        }
        let mut writer = self.writer.lock();
        let emitted = self
            .manager
            .consume_events_until(stop_timestamp, writer.as_mut())?;
        writer.flush()?;
        Ok(emitted)
    }

    /// Stop the session: quiesce writers, drain every remaining event, flush
    /// the sink. Idempotent; a second call is a no-op.
    pub fn disable(&self) -> Result<usize, SessionError> {
        if !self.enabled.swap(false, Ordering::AcqRel) {
            return Ok(0);
        }
        self.manager.suspend();
        let mut writer = self.writer.lock();
        let emitted = self.manager.consume_events_until(u64::MAX, writer.as_mut())?;
        writer.flush()?;
        debug!(
            emitted,
            dropped = self.manager.dropped_events(),
            "trace session disabled"
        );
        Ok(emitted)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    /// Events dropped rather than recorded since enable.
    pub fn dropped_events(&self) -> u64 {
        self.manager.dropped_events()
    }

    pub fn manager(&self) -> &BufferManager {
        &self.manager
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Best effort: a failing sink must not turn teardown into a panic.
        let _ = self.disable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::event::EventDescriptor;
    use crate::writer::MemoryWriter;

    fn manual_session(sink: MemoryWriter) -> (Session, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let session = Session::enable_with(
            SessionConfig::default(),
            Box::new(sink),
            clock.clone(),
            Arc::new(NullStackCapture),
        )
        .unwrap();
        (session, clock)
    }

    #[test]
    fn rejects_zero_budgets() {
        let config = SessionConfig {
            buffer_budget_bytes: 0,
            ..SessionConfig::default()
        };
        assert!(matches!(
            Session::enable(config, Box::new(MemoryWriter::new())),
            Err(SessionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn disable_drains_and_is_idempotent() {
        let sink = MemoryWriter::new();
        let (session, clock) = manual_session(sink.clone());
        let event = EventDescriptor::new(1, 1, 0);
        clock.set(5);
        assert!(session.write_event(&event, b"x", None, None, None));
        assert_eq!(session.disable().unwrap(), 1);
        assert_eq!(session.disable().unwrap(), 0);
        assert_eq!(sink.events().len(), 1);
        assert!(!session.is_enabled());
    }

    #[test]
    fn writes_after_disable_are_refused() {
        let sink = MemoryWriter::new();
        let (session, _clock) = manual_session(sink);
        session.disable().unwrap();
        let event = EventDescriptor::new(1, 1, 0);
        assert!(!session.write_event(&event, &[], None, None, None));
        assert!(matches!(session.flush(), Err(SessionError::Disabled)));
    }

    #[test]
    fn flush_until_is_exclusive_of_stop() {
        let sink = MemoryWriter::new();
        let (session, clock) = manual_session(sink.clone());
        let event = EventDescriptor::new(1, 1, 0);
        for ts in [3u64, 8] {
            clock.set(ts);
            assert!(session.write_event(&event, &[], None, None, None));
        }
        assert_eq!(session.flush_until(8).unwrap(), 1);
        assert_eq!(sink.events()[0].timestamp, 3);
        assert_eq!(session.flush_until(u64::MAX).unwrap(), 1);
    }
}
