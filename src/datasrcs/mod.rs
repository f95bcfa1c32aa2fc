//! Pluggable data sources that resolve ownership records and related domains
//!
//! Every source implements [`DataSource`] and is driven by its own worker
//! task (see [`spawn_source`]). Sources never talk to the cache or to each
//! other directly; they answer requests from the bus and publish results
//! back onto it.

pub mod http;
pub mod networksdb;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;

pub use http::{HttpFetcher, ReqwestFetcher};
pub use networksdb::NetworksDb;
pub use worker::{handle_request, handle_whois, spawn_source};

use crate::asn::{OwnershipRecord, Query, ResolveError, SourceType};
use crate::bus::{BusEvent, EventBus, Priority};
use crate::config::Config;
use crate::netblock::CidrSet;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared handles a data source needs while resolving
#[derive(Clone, Debug)]
pub struct SourceContext {
    bus: EventBus,
    cancel: CancellationToken,
}

impl SourceContext {
    /// Create a context publishing onto `bus` and observing `cancel`
    pub fn new(bus: EventBus, cancel: CancellationToken) -> Self {
        Self { bus, cancel }
    }

    /// The bus results and diagnostics are published on
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Token that aborts in-flight work
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Publish a diagnostic line for `source`
    pub fn log(&self, source: &str, message: impl Into<String>) {
        self.bus.publish(Priority::High, BusEvent::log(source, message));
    }

    /// Publish a liveness signal for `source`
    pub fn set_active(&self, source: &str) {
        self.bus
            .publish(Priority::Critical, BusEvent::SetActive(source.to_string()));
    }

    /// Run `fut` unless the context is cancelled first
    pub async fn until_cancelled<T, F>(&self, fut: F) -> Result<T, ResolveError>
    where
        F: Future<Output = Result<T, ResolveError>>,
    {
        tokio::select! {
            result = fut => result,
            _ = self.cancel.cancelled() => Err(ResolveError::Cancelled),
        }
    }
}

/// Interface implemented by every data source
///
/// Implementations must never return a record with empty netblocks; the
/// worker drops such records instead of publishing them.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Name used for provenance and diagnostics
    fn name(&self) -> &str;

    /// Whether this source answers from an API or a scrape
    ///
    /// Fixed when the source is constructed.
    fn source_type(&self) -> SourceType;

    /// Resolve the owner of an IP address
    async fn resolve_by_address(
        &self,
        ctx: &SourceContext,
        addr: IpAddr,
    ) -> Result<OwnershipRecord, ResolveError>;

    /// Resolve an AS number, reusing any netblocks already known for it
    async fn resolve_by_asn(
        &self,
        ctx: &SourceContext,
        asn: u32,
        known_netblocks: CidrSet,
    ) -> Result<OwnershipRecord, ResolveError>;

    /// Find domains hosted in the networks `domain` resolves into
    ///
    /// Sources without this capability keep the default, which finds
    /// nothing.
    async fn domains_in_network(
        &self,
        _ctx: &SourceContext,
        _domain: &str,
    ) -> Result<BTreeSet<String>, ResolveError> {
        Ok(BTreeSet::new())
    }

    /// Dispatch a query to the matching resolution method
    async fn resolve(
        &self,
        ctx: &SourceContext,
        query: &Query,
    ) -> Result<OwnershipRecord, ResolveError> {
        match *query {
            Query::Address(addr) => self.resolve_by_address(ctx, addr).await,
            Query::Asn(asn) => self.resolve_by_asn(ctx, asn, CidrSet::new()).await,
        }
    }
}

/// Build every data source enabled by `config`
pub fn default_sources(
    config: &Config,
    fetcher: Arc<dyn HttpFetcher>,
) -> Vec<Arc<dyn DataSource>> {
    vec![Arc::new(NetworksDb::from_config(config, fetcher))]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventFilter, Topic};
    use std::time::Duration;

    #[tokio::test]
    async fn test_context_publishes_diagnostics() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());
        let ctx = SourceContext::new(bus.clone(), CancellationToken::new());

        ctx.set_active("NetworksDB");
        ctx.log("NetworksDB", "no data");

        let active = sub.recv().await.unwrap();
        assert_eq!(active.topic(), Topic::SetActive);
        assert_eq!(active.priority, Priority::Critical);

        let log = sub.recv().await.unwrap();
        assert_eq!(log.topic(), Topic::Log);
        assert_eq!(log.priority, Priority::High);
    }

    #[tokio::test]
    async fn test_until_cancelled() {
        let cancel = CancellationToken::new();
        let ctx = SourceContext::new(EventBus::new(), cancel.clone());

        let value = ctx.until_cancelled(async { Ok::<_, ResolveError>(7) }).await;
        assert_eq!(value, Ok(7));

        cancel.cancel();
        let result = ctx
            .until_cancelled(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, ResolveError>(())
            })
            .await;
        assert_eq!(result, Err(ResolveError::Cancelled));
    }

    #[test]
    fn test_default_sources() {
        let config = Config::default();
        let fetcher = Arc::new(test_utils::ScriptedFetcher::new());
        let sources = default_sources(&config, fetcher);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name(), networksdb::NETWORKSDB_NAME);
        assert_eq!(sources[0].source_type(), SourceType::Scrape);
    }
}
