//! Status Broadcasting
//!
//! Three-level progress hierarchy (iteration → agent → tool call) streamed to
//! one observer per run.

mod broadcaster;
mod events;
mod sink;

pub use broadcaster::{
    AgentScope, BroadcastWriter, DEFAULT_FLUSH_TIMEOUT, DEFAULT_SEND_TIMEOUT, ObserverLimits, StatusBroadcaster,
};
pub use events::{EventKind, StatusEvent};
pub use sink::{ConsoleSink, EventSink, JsonLinesSink, MemorySink};
