//! Output targets for engine events.

use std::any::type_name;
use std::fs::{File, OpenOptions};
use std::io::{self, Result as IoResult, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex as ParkingMutex;

use super::event::EngineEvent;

/// Abstraction over an output target that consumes full event records.
///
/// Implementations may perform blocking I/O; the bus hands calls to a
/// dedicated worker task per sink so the async runtime stays responsive.
pub trait EventSink: Send + Sync {
    fn handle(&mut self, event: &EngineEvent) -> IoResult<()>;

    /// A stable, human-friendly identifier for this sink instance.
    fn name(&self) -> String {
        type_name::<Self>().to_string()
    }
}

/// JSON Lines sink: one event record per line. The canonical file backend
/// for the audit stream; also usable on stdout for development.
pub struct JsonLinesSink {
    handle: Box<dyn Write + Send + Sync>,
    label: String,
}

impl JsonLinesSink {
    pub fn new(handle: Box<dyn Write + Send + Sync>) -> Self {
        Self {
            handle,
            label: "JsonLinesSink".to_string(),
        }
    }

    pub fn to_stdout() -> Self {
        Self {
            handle: Box::new(io::stdout()),
            label: "JsonLinesSink(stdout)".to_string(),
        }
    }

    /// Append to a file, creating it if needed. Append mode keeps the
    /// stream append-only across process restarts.
    pub fn to_file(path: impl AsRef<Path>) -> IoResult<Self> {
        let file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            handle: Box::new(file),
            label: format!("JsonLinesSink({})", path.as_ref().display()),
        })
    }
}

impl EventSink for JsonLinesSink {
    fn handle(&mut self, event: &EngineEvent) -> IoResult<()> {
        let json = event
            .to_json_string()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(self.handle, "{json}")?;
        self.handle.flush()
    }

    fn name(&self) -> String {
        self.label.clone()
    }
}

/// In-memory sink for tests and snapshots.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<ParkingMutex<Vec<EngineEvent>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of all captured events; callers inspect without holding the
    /// lock.
    pub fn snapshot(&self) -> Vec<EngineEvent> {
        self.entries.lock().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn handle(&mut self, event: &EngineEvent) -> IoResult<()> {
        self.entries.lock().push(event.clone());
        Ok(())
    }
}

/// Forwards events into a flume channel for async consumers (SSE bridges,
/// brokers, live dashboards).
pub struct ChannelSink {
    tx: flume::Sender<EngineEvent>,
}

impl ChannelSink {
    pub fn new(tx: flume::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn handle(&mut self, event: &EngineEvent) -> IoResult<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel receiver dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::EventKind;
    use serde_json::json;

    #[test]
    fn memory_sink_captures() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer
            .handle(&EngineEvent::new(EventKind::GuardDecision, json!({"b": 1})))
            .unwrap();
        let events = sink.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::GuardDecision);
    }

    #[test]
    fn channel_sink_forwards() {
        let (tx, rx) = flume::unbounded();
        let mut sink = ChannelSink::new(tx);
        sink.handle(&EngineEvent::new(EventKind::ZombieReclaimed, json!({})))
            .unwrap();
        assert_eq!(rx.recv().unwrap().kind, EventKind::ZombieReclaimed);
    }

    #[test]
    fn jsonl_sink_writes_one_line_per_event() {
        let buffer: Arc<ParkingMutex<Vec<u8>>> = Arc::default();

        struct SharedWriter(Arc<ParkingMutex<Vec<u8>>>);
        impl Write for SharedWriter {
            fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> IoResult<()> {
                Ok(())
            }
        }

        let mut sink = JsonLinesSink::new(Box::new(SharedWriter(buffer.clone())));
        sink.handle(&EngineEvent::new(EventKind::StateTransition, json!({})))
            .unwrap();
        sink.handle(&EngineEvent::new(EventKind::StateTransition, json!({})))
            .unwrap();
        let written = String::from_utf8(buffer.lock().clone()).unwrap();
        assert_eq!(written.lines().count(), 2);
        assert!(written.lines().all(|l| l.contains("state_transition")));
    }
}
