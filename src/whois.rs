//! Related-domain discovery
//!
//! A [`WhoisRequest`] asks every data source which other domains are hosted
//! in the networks a domain resolves into. Sources answer with one
//! [`WhoisRecord`] each; [`DomainResolver`] publishes the request and
//! gathers the answers.

use crate::asn::record::next_request_id;
use crate::asn::{ResolveError, SourceType};
use crate::bus::{BusEvent, EventBus, EventFilter, Priority, ProgressWatch, Topic};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A related-domain request published to every data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoisRequest {
    /// Process-unique id, shared with resolution requests
    pub id: u64,
    /// Lowercase domain name without a trailing dot
    pub domain: String,
}

impl WhoisRequest {
    /// Create a request, normalizing the domain name
    pub fn new(domain: &str) -> Result<Self, ResolveError> {
        let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
        let valid = domain.contains('.')
            && !domain.starts_with('.')
            && domain
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
        if !valid {
            return Err(ResolveError::InvalidRequest(format!(
                "not a domain name: {domain:?}"
            )));
        }

        Ok(Self {
            id: next_request_id(),
            domain,
        })
    }
}

/// Domains one data source found sharing networks with a domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoisRecord {
    /// Id of the request this answers
    pub request_id: u64,
    /// The domain that was asked about
    pub domain: String,
    /// Domains found in the networks hosting `domain`
    pub new_domains: BTreeSet<String>,
    /// Whether the answer came from an API or a scrape
    pub tag: SourceType,
    /// Name of the data source that answered
    pub source: String,
}

/// Union of the domains in several answers
pub fn merge_domains(records: &[WhoisRecord]) -> BTreeSet<String> {
    records
        .iter()
        .flat_map(|r| r.new_domains.iter().cloned())
        .collect()
}

/// Publishes related-domain requests and collects the answers
#[derive(Clone, Debug)]
pub struct DomainResolver {
    bus: EventBus,
    sources: usize,
    timeout: Duration,
    cancel: CancellationToken,
}

impl DomainResolver {
    /// Create a resolver expecting `sources` running data sources
    pub fn new(
        bus: EventBus,
        sources: usize,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bus,
            sources,
            timeout,
            cancel,
        }
    }

    /// Ask every data source for domains related to `domain`
    ///
    /// Returns once every source has finished with the request. Sources
    /// that found nothing, or do not support the lookup, contribute no
    /// record. When the timeout elapses the answers gathered so far are
    /// returned, or `Timeout` if there are none.
    pub async fn related_domains(&self, domain: &str) -> Result<Vec<WhoisRecord>, ResolveError> {
        let request = WhoisRequest::new(domain)?;
        if self.cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        if self.sources == 0 {
            return Ok(Vec::new());
        }

        let id = request.id;
        let domain = request.domain.clone();
        let mut events = self.bus.subscribe(EventFilter::topics(vec![
            Topic::NewWhois,
            Topic::Progress,
            Topic::SetActive,
        ]));
        let mut watch = ProgressWatch::new(id, self.timeout);
        let mut records = Vec::new();

        let receivers = self
            .bus
            .publish(Priority::High, BusEvent::WhoisRequest(request));
        debug!(%domain, id, receivers, "Published whois request");

        while watch.finished() < self.sources {
            tokio::select! {
                message = events.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    watch.observe(&message.event);
                    if let BusEvent::NewWhois(record) = message.event {
                        if record.request_id == id {
                            records.push(record);
                        }
                    }
                }
                _ = tokio::time::sleep_until(watch.deadline()) => {
                    if records.is_empty() {
                        debug!(%domain, "Whois request timed out");
                        return Err(ResolveError::Timeout(self.timeout));
                    }
                    break;
                }
                _ = self.cancel.cancelled() => return Err(ResolveError::Cancelled),
            }
        }

        Ok(records)
    }
}
