//! Messages that flow through the event bus

use crate::asn::{OwnershipRecord, ResolutionRequest};
use crate::whois::{WhoisRecord, WhoisRequest};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Delivery priority attached to every message
///
/// `Critical` is reserved for liveness signals consumed by progress
/// watchdogs; results and diagnostics travel at `High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Liveness signals
    Critical,
    /// Results and diagnostics
    High,
    /// Everything else
    Low,
}

/// Topic a message is published under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// A resolution request for every data source
    AsnRequest,
    /// A completed ownership record
    NewAsn,
    /// A diagnostic line from a data source
    Log,
    /// A data source reporting that it is doing work
    SetActive,
    /// A data source reporting progress on one request
    Progress,
    /// A related-domain request for every data source
    WhoisRequest,
    /// Domains a data source found sharing networks with a domain
    NewWhois,
}

/// Payloads carried by the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusEvent {
    /// Ask every data source to resolve a key
    AsnRequest(ResolutionRequest),

    /// A data source produced a complete record
    NewAsn(OwnershipRecord),

    /// Diagnostic output from a data source
    Log {
        /// Name of the component that logged
        source: String,
        /// The message text
        message: String,
    },

    /// The named data source is about to make an outbound call
    SetActive(String),

    /// A data source queued a request behind the ones it is working on
    RequestQueued {
        /// Id of the queued request
        id: u64,
        /// Name of the data source
        source: String,
    },

    /// A data source began working on a request
    RequestStarted {
        /// Id of the started request
        id: u64,
        /// Name of the data source
        source: String,
    },

    /// A data source is done with a request, whatever the outcome
    RequestFinished {
        /// Id of the finished request
        id: u64,
        /// Name of the data source
        source: String,
    },

    /// Ask every data source for domains hosted alongside a domain
    WhoisRequest(WhoisRequest),

    /// A data source found related domains
    NewWhois(WhoisRecord),
}

impl BusEvent {
    /// Convenience constructor for a log line
    pub fn log(source: impl Into<String>, message: impl Into<String>) -> Self {
        BusEvent::Log {
            source: source.into(),
            message: message.into(),
        }
    }

    /// The topic this event belongs to
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::AsnRequest(_) => Topic::AsnRequest,
            BusEvent::NewAsn(_) => Topic::NewAsn,
            BusEvent::Log { .. } => Topic::Log,
            BusEvent::SetActive(_) => Topic::SetActive,
            BusEvent::RequestQueued { .. }
            | BusEvent::RequestStarted { .. }
            | BusEvent::RequestFinished { .. } => Topic::Progress,
            BusEvent::WhoisRequest(_) => Topic::WhoisRequest,
            BusEvent::NewWhois(_) => Topic::NewWhois,
        }
    }
}

/// An event together with its delivery metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Priority the publisher attached
    pub priority: Priority,
    /// When the message was published
    pub published_at: SystemTime,
    /// The payload
    pub event: BusEvent,
}

impl Message {
    /// Wrap an event, stamping the current time
    pub fn new(priority: Priority, event: BusEvent) -> Self {
        Self {
            priority,
            published_at: SystemTime::now(),
            event,
        }
    }

    /// The topic of the wrapped event
    pub fn topic(&self) -> Topic {
        self.event.topic()
    }
}

/// Selects which topics a subscription receives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Topics to receive; empty means all
    pub topics: Vec<Topic>,
}

impl EventFilter {
    /// Receive every message
    pub fn all() -> Self {
        Self { topics: Vec::new() }
    }

    /// Receive only the listed topics
    pub fn topics(topics: Vec<Topic>) -> Self {
        Self { topics }
    }

    /// Check whether a message passes the filter
    pub fn matches(&self, message: &Message) -> bool {
        self.topics.is_empty() || self.topics.contains(&message.topic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn::Query;

    #[test]
    fn test_event_topics() {
        let request = ResolutionRequest::new(Query::Asn(64500));
        assert_eq!(BusEvent::AsnRequest(request).topic(), Topic::AsnRequest);
        assert_eq!(BusEvent::log("src", "msg").topic(), Topic::Log);
        assert_eq!(
            BusEvent::SetActive("src".to_string()).topic(),
            Topic::SetActive
        );
        let started = BusEvent::RequestStarted {
            id: 7,
            source: "src".to_string(),
        };
        assert_eq!(started.topic(), Topic::Progress);
    }

    #[test]
    fn test_filter_matching() {
        let log = Message::new(Priority::High, BusEvent::log("src", "msg"));
        let active = Message::new(Priority::Critical, BusEvent::SetActive("src".to_string()));

        assert!(EventFilter::all().matches(&log));
        assert!(EventFilter::all().matches(&active));

        let filter = EventFilter::topics(vec![Topic::Log]);
        assert!(filter.matches(&log));
        assert!(!filter.matches(&active));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Low);
    }
}
