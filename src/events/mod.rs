//! Append-only engine events and the bus that fans them out.
//!
//! Every observable action (state transitions, guard decisions, pilot
//! requests, sweeper findings) emits one [`EngineEvent`]. The bus
//! broadcasts to any number of sinks (stdout JSON lines, files, in-memory
//! capture, flume channels) and to live subscribers. Emission never fails
//! into the caller: the worst outcome is a `Dropped` status and a bump of
//! the degraded-mode counter.

pub mod bus;
pub mod diagnostics;
pub mod emitter;
pub mod event;
pub mod hub;
pub mod sink;

pub use bus::EventBus;
pub use diagnostics::SinkDiagnostic;
pub use emitter::{EmitStatus, EventEmitter, NullEmitter};
pub use event::{EngineEvent, EventKind};
pub use hub::{EventHub, EventStream, HubEmitter};
pub use sink::{ChannelSink, EventSink, JsonLinesSink, MemorySink};
