//! The emitter contract: fire-and-account, never fail into the caller.

use std::fmt;

use super::event::EngineEvent;

/// What happened to an emitted event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmitStatus {
    /// Delivered to at least one live subscriber.
    Ok,
    /// Accepted but nobody is listening yet; the event sits in the buffer.
    Buffered,
    /// Nothing could take the event. Counted on the degraded-mode counter.
    Dropped,
}

/// Abstract emitter handed to the engine. Implementations must be cheap to
/// clone behind an `Arc` and must never block or panic.
pub trait EventEmitter: Send + Sync + fmt::Debug {
    fn emit(&self, event: EngineEvent) -> EmitStatus;
}

/// Emitter that discards everything. Useful for throwaway engines in unit
/// tests that don't assert on events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _event: EngineEvent) -> EmitStatus {
        EmitStatus::Dropped
    }
}
