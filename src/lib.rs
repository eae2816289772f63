#![doc = include_str!("../README.md")]

mod buffer;
pub mod clock;
pub mod event;
pub mod manager;
pub mod record;
pub mod session;
pub mod stack;
mod thread;
pub mod writer;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use event::{ActivityId, Event, EventDescriptor, NullStackCapture, StackCapture};
pub use manager::{BufferManager, ManagerConfig, SequencePoint};
pub use record::EventView;
pub use session::{Session, SessionConfig, SessionError, SessionKind};
pub use stack::{StackSnapshot, MAX_STACK_DEPTH};
pub use writer::{
    EventMeta, FileWriter, JsonLinesWriter, MemoryWriter, NullWriter, RecordedEvent, SinkItem,
};
