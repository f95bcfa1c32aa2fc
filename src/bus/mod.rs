//! Priority-tagged publish/subscribe bus
//!
//! Request issuers, data sources, the log forwarder and the resolution
//! cache only ever talk to each other through this bus:
//!
//! ```text
//! AsnResolver    --AsnRequest----> [bus] --> every DataSource worker
//! DomainResolver --WhoisRequest--> [bus] --> every DataSource worker
//! DataSource     --NewAsn--------> [bus] --> ResolutionCache
//! DataSource     --NewWhois------> [bus] --> DomainResolver
//! DataSource     --Progress------> [bus] --> waiting resolvers
//! DataSource     --Log/SetActive-> [bus] --> log forwarder
//! ```

pub mod events;
pub mod progress;
pub mod publisher;
pub mod subscriber;

pub use events::{BusEvent, EventFilter, Message, Priority, Topic};
pub use progress::ProgressWatch;
pub use publisher::EventBus;
pub use subscriber::{Subscription, SubscriptionError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Re-emit bus diagnostics through `tracing`
///
/// `Log` messages become warnings and `SetActive` liveness signals become
/// trace events. The task ends when the bus closes or `cancel` fires.
pub fn spawn_log_forwarder(bus: &EventBus, cancel: CancellationToken) -> JoinHandle<()> {
    let mut subscription = bus.subscribe(EventFilter::topics(vec![Topic::Log, Topic::SetActive]));

    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                message = subscription.recv() => message,
                _ = cancel.cancelled() => break,
            };
            let Some(message) = message else {
                break;
            };
            match message.event {
                BusEvent::Log { source, message } => warn!(%source, "{message}"),
                BusEvent::SetActive(source) => trace!(%source, "active"),
                _ => {}
            }
        }
    })
}
