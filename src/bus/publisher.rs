//! Publishing side of the event bus

use super::events::{BusEvent, EventFilter, Message, Priority};
use super::subscriber::Subscription;
use crate::config::DEFAULT_CHANNEL_CAPACITY;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// In-process publish/subscribe bus
///
/// Uses `tokio::sync::broadcast`, so publishing never waits for
/// subscribers to handle a message. Cloning the bus yields another handle
/// to the same channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Message>,
    published: Arc<AtomicU64>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus with the default per-subscriber capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus buffering up to `capacity` messages per subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscription; only messages published after this call
    /// are delivered to it
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        debug!(topics = ?filter.topics, "New subscription created");
        Subscription::new(self.sender.subscribe(), filter)
    }

    /// Publish an event and return how many subscribers will see it
    pub fn publish(&self, priority: Priority, event: BusEvent) -> usize {
        let topic = event.topic();
        self.published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(Message::new(priority, event)) {
            Ok(receivers) => {
                trace!(?topic, ?priority, receivers, "Message published");
                receivers
            }
            Err(_) => {
                trace!(?topic, ?priority, "Message dropped (no subscribers)");
                0
            }
        }
    }

    /// Total number of messages published
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Per-subscriber buffer size
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
