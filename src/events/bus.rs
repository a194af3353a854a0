//! `EventBus` fans events out to in-process subscribers (the realtime
//! fan-out, tests) via `tokio::sync::broadcast`, and mirrors every publish
//! to an external transport (Redis pub/sub) so other processes sharing the
//! same deployment see the same events.
//!
//! Delivery to in-process subscribers is immediate and at-least-once for
//! anyone already subscribed; delivery to the external transport degrades
//! gracefully: while disconnected, publishes accumulate in a bounded FIFO
//! outbox and are flushed in order on reconnect. When the outbox is full,
//! the oldest entry is dropped and the loss is logged — never blocks, never
//! panics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::model::Event;

const DEFAULT_CAPACITY: usize = 1024;
const OUTBOX_CAPACITY: usize = 1000;
const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(2);

/// Publishes events to an external transport. Implemented for Redis in
/// production; swapped for a no-op in tests that only care about the
/// in-process broadcast side.
#[async_trait::async_trait]
pub trait ExternalTransport: Send + Sync {
    async fn publish(&self, event: &Event) -> Result<(), String>;
    async fn connect(&self) -> Result<(), String>;
}

/// An external transport that is never reachable — every publish and every
/// connect attempt fails. Used when no external transport is configured;
/// publishes then live entirely in the outbox until a real transport is set.
struct NullTransport;

#[async_trait::async_trait]
impl ExternalTransport for NullTransport {
    async fn publish(&self, _event: &Event) -> Result<(), String> {
        Err("no external transport configured".into())
    }
    async fn connect(&self) -> Result<(), String> {
        Err("no external transport configured".into())
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    outbox: Arc<Mutex<VecDeque<Event>>>,
    ready: Arc<AtomicBool>,
    transport: Arc<dyn ExternalTransport>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            outbox: Arc::new(Mutex::new(VecDeque::new())),
            ready: Arc::new(AtomicBool::new(false)),
            transport: Arc::new(NullTransport),
        }
    }

    pub fn with_transport(transport: Arc<dyn ExternalTransport>) -> Self {
        let mut bus = Self::new(DEFAULT_CAPACITY);
        bus.transport = transport;
        bus
    }

    /// Subscribe to receive every event published from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// `ready` iff the external transport's connection state is `ready`.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Publish an event: always delivered to in-process subscribers
    /// immediately; mirrored to the external transport if connected,
    /// otherwise queued in the bounded outbox.
    pub async fn publish(&self, event: Event) {
        let _ = self.sender.send(event.clone());

        if self.is_ready() {
            if let Err(e) = self.transport.publish(&event).await {
                warn!("external publish failed, queuing to outbox: {e}");
                self.ready.store(false, Ordering::Relaxed);
                self.enqueue_outbox(event).await;
            }
        } else {
            self.enqueue_outbox(event).await;
        }
    }

    async fn enqueue_outbox(&self, event: Event) {
        let mut outbox = self.outbox.lock().await;
        if outbox.len() >= OUTBOX_CAPACITY {
            let dropped = outbox.pop_front();
            warn!(
                dropped_event = ?dropped.map(|e| e.kind),
                "event outbox full, dropping oldest entry"
            );
        }
        outbox.push_back(event);
    }

    /// Flush the outbox to the external transport in FIFO order. Called
    /// once reconnection succeeds; stops (re-queuing the rest) on the
    /// first publish failure.
    async fn flush_outbox(&self) {
        let mut outbox = self.outbox.lock().await;
        while let Some(event) = outbox.pop_front() {
            if let Err(e) = self.transport.publish(&event).await {
                warn!("outbox flush interrupted: {e}");
                outbox.push_front(event);
                self.ready.store(false, Ordering::Relaxed);
                return;
            }
        }
        debug!("event outbox flushed");
    }

    /// Background reconnect loop: exponential backoff capped at 2s. Spawn
    /// once at startup; runs until the process exits.
    pub async fn run_reconnect_loop(self: Arc<Self>) {
        let mut delay = Duration::from_millis(100);
        loop {
            if !self.is_ready() {
                match self.transport.connect().await {
                    Ok(()) => {
                        info!("event bus transport connected");
                        self.ready.store(true, Ordering::Relaxed);
                        self.flush_outbox().await;
                        delay = Duration::from_millis(100);
                    }
                    Err(e) => {
                        debug!("event bus transport reconnect failed: {e}");
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(RECONNECT_BACKOFF_CAP);
                        continue;
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventKind;
    use uuid::Uuid;

    fn sample_event(kind: EventKind) -> Event {
        Event::new(kind, Some(Uuid::new_v4()), serde_json::json!({}))
    }

    #[tokio::test]
    async fn publish_without_subscriber_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(sample_event(EventKind::ProjectAdded)).await;
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(sample_event(EventKind::ProjectAdded)).await;
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::ProjectAdded);
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(sample_event(EventKind::AnalysisCompleted))
            .await;
        assert_eq!(rx1.try_recv().unwrap().kind, EventKind::AnalysisCompleted);
        assert_eq!(rx2.try_recv().unwrap().kind, EventKind::AnalysisCompleted);
    }

    #[tokio::test]
    async fn publish_without_transport_queues_to_outbox() {
        let bus = EventBus::default();
        assert!(!bus.is_ready());
        for _ in 0..5 {
            bus.publish(sample_event(EventKind::AnalysisProgress)).await;
        }
        assert_eq!(bus.outbox.lock().await.len(), 5);
    }

    #[tokio::test]
    async fn outbox_drops_oldest_when_full() {
        let bus = EventBus::default();
        for _ in 0..(OUTBOX_CAPACITY + 10) {
            bus.publish(sample_event(EventKind::AnalysisProgress)).await;
        }
        assert_eq!(bus.outbox.lock().await.len(), OUTBOX_CAPACITY);
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_affect_others() {
        let bus = EventBus::default();
        let rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        drop(rx1);
        bus.publish(sample_event(EventKind::ProjectRemoved)).await;
        assert_eq!(rx2.try_recv().unwrap().kind, EventKind::ProjectRemoved);
    }
}
