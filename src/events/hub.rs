//! Broadcast hub: sequence stamping, subscriber fan-out, drop accounting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio::time::timeout;

use super::emitter::{EmitStatus, EventEmitter};
use super::event::EngineEvent;

/// Snapshot of hub health.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventHubMetrics {
    /// Per-subscriber buffer size before lag kicks in.
    pub capacity: usize,
    /// Events dropped: slow subscribers plus publishes with no listener.
    pub dropped: usize,
}

#[derive(Debug)]
pub struct EventHub {
    sender: RwLock<Option<Sender<EngineEvent>>>,
    next_seq: AtomicU64,
    dropped_events: AtomicUsize,
    capacity: usize,
}

impl EventHub {
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Arc::new(Self {
            sender: RwLock::new(Some(sender)),
            next_seq: AtomicU64::new(1),
            dropped_events: AtomicUsize::new(0),
            capacity,
        })
    }

    /// Stamp a sequence number and broadcast. Total: the only failure mode
    /// is `Dropped`, counted and logged, never surfaced as an error.
    pub fn publish(&self, mut event: EngineEvent) -> EmitStatus {
        event.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        match self.current_sender() {
            Some(sender) => match sender.send(event) {
                Ok(_) => EmitStatus::Ok,
                Err(broadcast::error::SendError(event)) => {
                    // No live receiver. The event is gone; account for it.
                    self.record_drop(1);
                    tracing::debug!(
                        target: "gatewright::events",
                        kind = %event.kind,
                        "event dropped: no subscribers"
                    );
                    EmitStatus::Dropped
                }
            },
            None => {
                self.record_drop(1);
                EmitStatus::Dropped
            }
        }
    }

    pub fn subscribe(self: &Arc<Self>) -> EventStream {
        let receiver = self
            .current_sender()
            .map(|sender| sender.subscribe())
            .unwrap_or_else(|| {
                let (sender, receiver) = broadcast::channel(self.capacity.max(1));
                drop(sender);
                receiver
            });
        EventStream {
            receiver,
            hub: Arc::clone(self),
        }
    }

    pub fn emitter(self: &Arc<Self>) -> HubEmitter {
        HubEmitter {
            hub: Arc::clone(self),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> usize {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> EventHubMetrics {
        EventHubMetrics {
            capacity: self.capacity(),
            dropped: self.dropped(),
        }
    }

    /// Close the hub; subsequent publishes drop.
    pub fn close(&self) {
        let _ = self.sender.write().take();
    }

    fn current_sender(&self) -> Option<Sender<EngineEvent>> {
        self.sender.read().clone()
    }

    fn record_drop(&self, n: usize) {
        let total = self
            .dropped_events
            .fetch_add(n, Ordering::Relaxed)
            .saturating_add(n);
        tracing::warn!(
            target: "gatewright::events",
            dropped = n,
            total_dropped = total,
            "event stream degraded; dropped events"
        );
    }

    pub(crate) fn record_lag(&self, missed: u64) {
        if missed == 0 {
            return;
        }
        self.record_drop(usize::try_from(missed).unwrap_or(usize::MAX));
    }
}

/// Emitter handle backed by a hub; clones share the hub.
#[derive(Clone, Debug)]
pub struct HubEmitter {
    hub: Arc<EventHub>,
}

impl EventEmitter for HubEmitter {
    fn emit(&self, event: EngineEvent) -> EmitStatus {
        self.hub.publish(event)
    }
}

/// Live subscription to the hub.
#[derive(Debug)]
pub struct EventStream {
    receiver: Receiver<EngineEvent>,
    hub: Arc<EventHub>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Result<EngineEvent, broadcast::error::RecvError> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                self.hub.record_lag(missed);
                Err(broadcast::error::RecvError::Lagged(missed))
            }
            Err(err) => Err(err),
        }
    }

    pub fn try_recv(&mut self) -> Result<EngineEvent, broadcast::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(event),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                self.hub.record_lag(missed);
                Err(broadcast::error::TryRecvError::Lagged(missed))
            }
            Err(err) => Err(err),
        }
    }

    pub fn into_inner(self) -> Receiver<EngineEvent> {
        self.receiver
    }

    /// Convert into a boxed async stream; lag is absorbed into metrics.
    pub fn into_async_stream(self) -> BoxStream<'static, EngineEvent> {
        let EventStream { receiver, hub } = self;
        stream::unfold((receiver, hub), |(mut receiver, hub)| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, (receiver, hub))),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        hub.record_lag(missed);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }

    /// Wait up to `duration` for the next event.
    pub async fn next_timeout(&mut self, duration: Duration) -> Option<EngineEvent> {
        loop {
            match timeout(duration, self.recv()).await {
                Ok(Ok(event)) => return Some(event),
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::EventKind;
    use serde_json::json;

    #[tokio::test]
    async fn publish_stamps_monotonic_seq() {
        let hub = EventHub::new(16);
        let mut stream = hub.subscribe();
        for _ in 0..3 {
            hub.publish(EngineEvent::new(EventKind::StateTransition, json!({})));
        }
        let a = stream.recv().await.unwrap();
        let b = stream.recv().await.unwrap();
        let c = stream.recv().await.unwrap();
        assert!(a.seq < b.seq && b.seq < c.seq);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped_not_error() {
        let hub = EventHub::new(4);
        let status = hub.publish(EngineEvent::new(EventKind::GuardDecision, json!({})));
        assert_eq!(status, EmitStatus::Dropped);
        assert_eq!(hub.dropped(), 1);
    }

    #[tokio::test]
    async fn closed_hub_drops() {
        let hub = EventHub::new(4);
        let _stream = hub.subscribe();
        hub.close();
        let status = hub.publish(EngineEvent::new(EventKind::GuardDecision, json!({})));
        assert_eq!(status, EmitStatus::Dropped);
    }
}
