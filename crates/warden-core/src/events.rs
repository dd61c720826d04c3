//! Engine event bus

use tokio::sync::broadcast;
use tracing::trace;
use warden_api::{Event, EventPayload};

/// Events buffered per subscriber before the slowest one starts lagging
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Fan-out of engine events to any number of subscribers.
///
/// Publishing never blocks and never fails; events published while nobody
/// is subscribed are dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, payload: EventPayload) {
        trace!(payload = ?payload, "Publishing event");
        let _ = self.tx.send(Event::new(payload));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
