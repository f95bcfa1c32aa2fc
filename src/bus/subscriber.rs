//! Subscription side of the event bus

use super::events::{EventFilter, Message};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

/// Errors from subscription operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The event bus was closed
    #[error("Event bus closed")]
    Closed,
}

/// A handle for receiving messages that pass a filter
pub struct Subscription {
    receiver: broadcast::Receiver<Message>,
    filter: EventFilter,
}

impl Subscription {
    pub(crate) fn new(receiver: broadcast::Receiver<Message>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching message
    ///
    /// Returns `None` once every sender has been dropped. A subscriber that
    /// falls behind skips the overwritten messages and keeps going.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            let message = match self.receiver.recv().await {
                Ok(m) => m,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(
                        lagged = count,
                        topics = ?self.filter.topics,
                        "Subscriber lagged, messages dropped"
                    );
                    continue;
                }
            };

            if self.filter.matches(&message) {
                return Some(message);
            }
        }
    }

    /// Receive the next matching message without waiting
    ///
    /// Returns `Ok(None)` when nothing is queued.
    pub fn try_recv(&mut self) -> Result<Option<Message>, SubscriptionError> {
        loop {
            let message = match self.receiver.try_recv() {
                Ok(m) => m,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(
                        lagged = count,
                        topics = ?self.filter.topics,
                        "Subscriber lagged, messages dropped"
                    );
                    continue;
                }
            };

            if self.filter.matches(&message) {
                return Ok(Some(message));
            }
        }
    }

    /// The filter for this subscription
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}
