//! The event bus: one hub, many sinks, one worker task per sink.
//!
//! The bus is owned by the engine facade, not by the storage layer, so two
//! engines over the same database can observe independently. Sinks run on
//! their own tasks; a slow file never stalls a submit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use tokio::{sync::oneshot, task};

use super::diagnostics::{DiagnosticsStream, SinkDiagnostic};
use super::emitter::EventEmitter;
use super::hub::{EventHub, EventHubMetrics, EventStream};
use super::sink::{EventSink, JsonLinesSink};

const DEFAULT_BUFFER_CAPACITY: usize = 1024;

pub struct EventBus {
    sinks: Arc<Mutex<Vec<SinkEntry>>>,
    hub: Arc<EventHub>,
    diagnostics: tokio::sync::broadcast::Sender<SinkDiagnostic>,
    started: AtomicBool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(JsonLinesSink::to_stdout())
    }
}

impl EventBus {
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self::with_sinks(vec![Box::new(sink)])
    }

    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self::with_capacity(sinks, DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(sinks: Vec<Box<dyn EventSink>>, buffer_capacity: usize) -> Self {
        let hub = EventHub::new(buffer_capacity);
        let (diagnostics, _) = tokio::sync::broadcast::channel(64);
        let entries = sinks.into_iter().map(SinkEntry::new).collect();
        Self {
            sinks: Arc::new(Mutex::new(entries)),
            hub,
            diagnostics,
            started: AtomicBool::new(false),
        }
    }

    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.add_boxed_sink(Box::new(sink));
    }

    pub fn add_boxed_sink(&self, sink: Box<dyn EventSink>) {
        let mut sinks = self.sinks.lock().expect("sink registry poisoned");
        let mut entry = SinkEntry::new(sink);
        if self.started.load(Ordering::SeqCst) {
            entry.spawn_worker(self.hub.clone(), self.diagnostics.clone());
        }
        sinks.push(entry);
    }

    /// The emitter handed to the engine.
    pub fn emitter(&self) -> Arc<dyn EventEmitter> {
        Arc::new(self.hub.emitter())
    }

    /// Subscribe to the live event stream.
    pub fn subscribe(&self) -> EventStream {
        self.hub.subscribe()
    }

    /// Subscribe to sink-failure diagnostics.
    pub fn subscribe_diagnostics(&self) -> DiagnosticsStream {
        DiagnosticsStream::new(self.diagnostics.subscribe())
    }

    pub fn metrics(&self) -> EventHubMetrics {
        self.hub.metrics()
    }

    /// Start the per-sink worker tasks. Idempotent.
    pub fn listen_for_events(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sinks = self.sinks.lock().expect("sink registry poisoned");
        for entry in sinks.iter_mut() {
            entry.spawn_worker(self.hub.clone(), self.diagnostics.clone());
        }
    }

    /// Stop workers and wait for them to drain.
    pub async fn stop_listener(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let workers: Vec<SinkWorker> = {
            let mut sinks = self.sinks.lock().expect("sink registry poisoned");
            sinks.iter_mut().filter_map(SinkEntry::take_worker).collect()
        };
        for worker in workers {
            let _ = worker.shutdown.send(());
            let _ = worker.handle.await;
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if self.started.load(Ordering::SeqCst) {
            if let Ok(mut sinks) = self.sinks.lock() {
                for entry in sinks.iter_mut() {
                    entry.abort_worker();
                }
            }
        }
    }
}

struct SinkEntry {
    sink: Arc<Mutex<Box<dyn EventSink>>>,
    worker: Option<SinkWorker>,
}

impl SinkEntry {
    fn new(sink: Box<dyn EventSink>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            worker: None,
        }
    }

    fn spawn_worker(
        &mut self,
        hub: Arc<EventHub>,
        diagnostics: tokio::sync::broadcast::Sender<SinkDiagnostic>,
    ) {
        if self.worker.is_some() {
            return;
        }
        let sink = Arc::clone(&self.sink);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let mut stream = hub.subscribe();
        let errors = AtomicU64::new(0);
        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    event = stream.recv() => match event {
                        Ok(event) => {
                            let failure = {
                                let mut guard = match sink.lock() {
                                    Ok(guard) => guard,
                                    Err(_) => break,
                                };
                                guard.handle(&event).err().map(|err| (guard.name(), err))
                            };
                            if let Some((name, err)) = failure {
                                let occurrence = errors.fetch_add(1, Ordering::Relaxed) + 1;
                                tracing::warn!(
                                    target: "gatewright::events",
                                    sink = %name,
                                    error = %err,
                                    occurrence,
                                    "event sink error"
                                );
                                let _ = diagnostics.send(SinkDiagnostic {
                                    sink: name,
                                    error: err.to_string(),
                                    when: Utc::now(),
                                    occurrence,
                                });
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
            }
        });
        self.worker = Some(SinkWorker {
            shutdown: shutdown_tx,
            handle,
        });
    }

    fn take_worker(&mut self) -> Option<SinkWorker> {
        self.worker.take()
    }

    fn abort_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown.send(());
            worker.handle.abort();
        }
    }
}

struct SinkWorker {
    shutdown: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::{EngineEvent, EventKind};
    use crate::events::sink::MemorySink;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn events_reach_memory_sink() {
        let sink = MemorySink::new();
        let bus = EventBus::with_sink(sink.clone());
        bus.listen_for_events();
        let emitter = bus.emitter();

        emitter.emit(EngineEvent::new(EventKind::StateTransition, json!({"n": 1})));
        emitter.emit(EngineEvent::new(EventKind::GuardDecision, json!({"n": 2})));

        // Give the worker task a beat to drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.stop_listener().await;

        let events = sink.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::StateTransition);
    }

    #[tokio::test]
    async fn failing_sink_produces_diagnostic_not_error() {
        struct FailingSink;
        impl EventSink for FailingSink {
            fn handle(&mut self, _event: &EngineEvent) -> std::io::Result<()> {
                Err(std::io::Error::other("disk on fire"))
            }
            fn name(&self) -> String {
                "FailingSink".to_string()
            }
        }

        let bus = EventBus::with_sink(FailingSink);
        bus.listen_for_events();
        let mut diagnostics = bus.subscribe_diagnostics();
        let emitter = bus.emitter();
        emitter.emit(EngineEvent::new(EventKind::ZombieSoftDetected, json!({})));

        let diag = diagnostics
            .next_timeout(Duration::from_secs(1))
            .await
            .expect("expected a sink diagnostic");
        assert_eq!(diag.sink, "FailingSink");
        assert!(diag.error.contains("disk on fire"));
        bus.stop_listener().await;
    }
}
