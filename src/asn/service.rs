//! Resolution orchestrator
//!
//! [`AsnResolver`] answers queries from the [`ResolutionCache`] when it can.
//! On a miss it publishes one request onto the bus and waits, bounded by a
//! timeout, for any data source to populate the cache.

use super::cache::ResolutionCache;
use super::error::ResolveError;
use super::record::{OwnershipRecord, Query, ResolutionRequest};
use crate::bus::{BusEvent, EventBus, EventFilter, Priority, ProgressWatch, Topic};
use crate::config::Config;
use crate::storage::{InfrastructureFact, InfrastructureStore};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cache-fronted resolver for addresses and AS numbers
///
/// # Examples
///
/// ```no_run
/// use netowner::asn::{AsnResolver, ResolutionCache};
/// use netowner::bus::EventBus;
/// use netowner::config::Config;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let bus = EventBus::new();
///     let cache = Arc::new(ResolutionCache::new());
///     let cancel = CancellationToken::new();
///     cache.attach(&bus, cancel.clone());
///
///     let resolver = AsnResolver::new(bus, cache, &Config::default(), cancel);
///     let record = resolver.resolve_address("198.51.100.7".parse()?).await?;
///     println!("AS{} {}", record.asn, record.prefix);
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct AsnResolver {
    bus: EventBus,
    cache: Arc<ResolutionCache>,
    poll_interval: Duration,
    resolve_timeout: Duration,
    cancel: CancellationToken,
}

impl AsnResolver {
    /// Create a resolver using the timing from `config`
    pub fn new(
        bus: EventBus,
        cache: Arc<ResolutionCache>,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_timing(
            bus,
            cache,
            config.poll_interval,
            config.resolve_timeout,
            cancel,
        )
    }

    /// Create a resolver with explicit timing
    ///
    /// A zero poll interval is raised to one millisecond.
    pub fn with_timing(
        bus: EventBus,
        cache: Arc<ResolutionCache>,
        poll_interval: Duration,
        resolve_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bus,
            cache,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            resolve_timeout,
            cancel,
        }
    }

    /// The cache this resolver reads from
    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    /// Upper bound on a single resolution
    pub fn resolve_timeout(&self) -> Duration {
        self.resolve_timeout
    }

    /// Resolve the owner of an IP address
    pub async fn resolve_address(&self, addr: IpAddr) -> Result<OwnershipRecord, ResolveError> {
        self.resolve(Query::Address(addr)).await
    }

    /// Resolve the details of an AS number
    pub async fn resolve_asn(&self, asn: u32) -> Result<OwnershipRecord, ResolveError> {
        if asn == 0 {
            return Err(ResolveError::InvalidRequest(
                "AS number must be positive".to_string(),
            ));
        }
        self.resolve(Query::Asn(asn)).await
    }

    /// Resolve from optional parts; the address wins when both are given
    ///
    /// A request with neither key is rejected without dispatching.
    pub async fn resolve_request(
        &self,
        address: Option<IpAddr>,
        asn: Option<u32>,
    ) -> Result<OwnershipRecord, ResolveError> {
        let request = ResolutionRequest::from_parts(address, asn)?;
        self.resolve_with(request).await
    }

    /// Resolve a query, waiting for a data source on a cache miss
    ///
    /// A cache hit returns immediately without publishing anything. On a
    /// miss exactly one request is published; the cache is then re-checked
    /// whenever it changes and at least every poll interval, until a record
    /// appears, the timeout elapses or the resolver is cancelled.
    ///
    /// The timeout bounds time without progress rather than time spent in a
    /// source's queue; see [`ProgressWatch`].
    pub async fn resolve(&self, query: Query) -> Result<OwnershipRecord, ResolveError> {
        self.resolve_with(ResolutionRequest::new(query)).await
    }

    async fn resolve_with(
        &self,
        request: ResolutionRequest,
    ) -> Result<OwnershipRecord, ResolveError> {
        let query = request.query;
        if let Some(record) = self.cache.lookup(&query) {
            debug!(%query, asn = record.asn, "Cache hit");
            return Ok(record);
        }
        if self.cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        let id = request.id;
        let mut progress = self
            .bus
            .subscribe(EventFilter::topics(vec![Topic::Progress, Topic::SetActive]));
        let mut watch = ProgressWatch::new(id, self.resolve_timeout);
        let mut request = Some(request);

        loop {
            // Registered before the check so an update in between still wakes us
            let changed = self.cache.changed();
            if let Some(record) = self.cache.lookup(&query) {
                debug!(%query, asn = record.asn, "Resolved");
                return Ok(record);
            }

            if let Some(request) = request.take() {
                let receivers = self
                    .bus
                    .publish(Priority::High, BusEvent::AsnRequest(request));
                debug!(%query, id, receivers, "Published resolution request");
            }

            tokio::select! {
                _ = changed => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
                Some(message) = progress.recv() => watch.observe(&message.event),
                _ = tokio::time::sleep_until(watch.deadline()) => {
                    return self.cache.lookup(&query).ok_or_else(|| {
                        debug!(%query, "Resolution timed out");
                        ResolveError::Timeout(self.resolve_timeout)
                    });
                }
                _ = self.cancel.cancelled() => return Err(ResolveError::Cancelled),
            }
        }
    }

    /// Resolve several queries concurrently
    ///
    /// Duplicate queries are resolved once.
    pub async fn resolve_many(
        &self,
        queries: impl IntoIterator<Item = Query>,
    ) -> HashMap<Query, Result<OwnershipRecord, ResolveError>> {
        let unique: HashSet<Query> = queries.into_iter().collect();
        let mut pending: FuturesUnordered<_> = unique
            .into_iter()
            .map(|query| async move { (query, self.resolve(query).await) })
            .collect();

        let mut results = HashMap::new();
        while let Some((query, result)) = pending.next().await {
            results.insert(query, result);
        }
        results
    }

    /// Attach ownership facts to previously discovered addresses
    ///
    /// Each address is answered from a cached record covering it when one
    /// exists and resolved otherwise. Addresses that cannot be resolved are
    /// skipped. Returns the number of facts the store accepted.
    pub async fn heal(
        &self,
        addresses: &[IpAddr],
        run_id: &str,
        store: &dyn InfrastructureStore,
    ) -> usize {
        let mut healed = 0;

        for &addr in addresses {
            let record = match self.cache.covering_address(&addr) {
                Some(record) => record,
                None => match self.resolve_address(addr).await {
                    Ok(record) => record,
                    Err(ResolveError::Cancelled) => break,
                    Err(e) => {
                        debug!(%addr, error = %e, "Skipping address");
                        continue;
                    }
                },
            };

            let fact = InfrastructureFact::from_record(&record, addr);
            match store.insert_infrastructure(&fact, run_id).await {
                Ok(()) => healed += 1,
                Err(e) => warn!(%addr, run_id, error = %e, "Failed to store infrastructure fact"),
            }
        }

        healed
    }
}
