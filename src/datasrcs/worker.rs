//! Per-source request worker

use super::{DataSource, SourceContext};
use crate::asn::{ResolutionRequest, ResolveError};
use crate::bus::{BusEvent, EventBus, EventFilter, Priority, Topic};
use crate::whois::{WhoisRecord, WhoisRequest};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

enum Work {
    Resolve(ResolutionRequest),
    Whois(WhoisRequest),
}

impl Work {
    fn id(&self) -> u64 {
        match self {
            Work::Resolve(request) => request.id,
            Work::Whois(request) => request.id,
        }
    }
}

/// Drive `source` from the bus until it closes or `cancel` fires
///
/// The request subscriptions are registered before this returns. An intake
/// task drains requests off the bus as they arrive and queues them, so a
/// busy source never falls behind the bus. Requests are then handled one
/// at a time in arrival order, so a source never runs two resolutions
/// concurrently. Each request is announced as `RequestQueued` on intake,
/// `RequestStarted` once work on it begins and `RequestFinished` after.
pub fn spawn_source(
    source: Arc<dyn DataSource>,
    bus: &EventBus,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut subscription = bus.subscribe(EventFilter::topics(vec![
        Topic::AsnRequest,
        Topic::WhoisRequest,
    ]));
    let ctx = SourceContext::new(bus.clone(), cancel.clone());
    let (queue, mut queued) = mpsc::unbounded_channel::<Work>();

    let intake_bus = bus.clone();
    let intake_cancel = cancel.clone();
    let name = source.name().to_string();
    let intake = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                message = subscription.recv() => message,
                _ = intake_cancel.cancelled() => break,
            };
            let Some(message) = message else {
                break;
            };
            let work = match message.event {
                BusEvent::AsnRequest(request) => Work::Resolve(request),
                BusEvent::WhoisRequest(request) => Work::Whois(request),
                _ => continue,
            };
            // Announced before queueing so it always precedes RequestStarted
            intake_bus.publish(
                Priority::Critical,
                BusEvent::RequestQueued {
                    id: work.id(),
                    source: name.clone(),
                },
            );
            if queue.send(work).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        debug!(source = source.name(), "Data source started");
        loop {
            let work = tokio::select! {
                work = queued.recv() => work,
                _ = cancel.cancelled() => break,
            };
            let Some(work) = work else {
                break;
            };

            let id = work.id();
            let name = source.name().to_string();
            ctx.bus().publish(
                Priority::Critical,
                BusEvent::RequestStarted {
                    id,
                    source: name.clone(),
                },
            );
            match &work {
                Work::Resolve(request) => {
                    handle_request(source.as_ref(), &ctx, request).await;
                }
                Work::Whois(request) => {
                    handle_whois(source.as_ref(), &ctx, request).await;
                }
            }
            ctx.bus().publish(
                Priority::Critical,
                BusEvent::RequestFinished { id, source: name },
            );
        }
        if let Err(e) = intake.await {
            debug!(source = source.name(), error = %e, "Request intake ended abnormally");
        }
        debug!(source = source.name(), "Data source stopped");
    })
}

/// Resolve one request and publish the outcome
///
/// A well-formed record is published as `NewAsn`; any failure is published
/// as a `Log` diagnostic instead. Returns whether a record was published.
pub async fn handle_request(
    source: &dyn DataSource,
    ctx: &SourceContext,
    request: &ResolutionRequest,
) -> bool {
    let name = source.name();
    debug!(source = name, id = request.id, query = %request.query, "Handling request");

    match source.resolve(ctx, &request.query).await {
        Ok(record) if record.is_well_formed() => {
            ctx.bus()
                .publish(Priority::High, BusEvent::NewAsn(record));
            true
        }
        Ok(record) => {
            ctx.log(
                name,
                format!(
                    "{name}: discarded incomplete record for AS{} ({})",
                    record.asn, request.query
                ),
            );
            false
        }
        Err(ResolveError::Cancelled) => {
            debug!(source = name, id = request.id, "Request cancelled");
            false
        }
        Err(e) => {
            ctx.log(name, format!("{name}: {e}"));
            false
        }
    }
}

/// Look up related domains and publish what was found
///
/// Publishes `NewWhois` only when at least one domain was found; failures
/// become `Log` diagnostics. Returns whether a record was published.
pub async fn handle_whois(
    source: &dyn DataSource,
    ctx: &SourceContext,
    request: &WhoisRequest,
) -> bool {
    let name = source.name();
    debug!(source = name, id = request.id, domain = %request.domain, "Handling whois request");

    match source.domains_in_network(ctx, &request.domain).await {
        Ok(new_domains) if new_domains.is_empty() => false,
        Ok(new_domains) => {
            let record = WhoisRecord {
                request_id: request.id,
                domain: request.domain.clone(),
                new_domains,
                tag: source.source_type(),
                source: name.to_string(),
            };
            ctx.bus()
                .publish(Priority::High, BusEvent::NewWhois(record));
            true
        }
        Err(ResolveError::Cancelled) => {
            debug!(source = name, id = request.id, "Whois request cancelled");
            false
        }
        Err(e) => {
            ctx.log(name, format!("{name}: {}: {e}", request.domain));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn::{OwnershipRecord, Query, SourceType};
    use crate::netblock::CidrSet;
    use async_trait::async_trait;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedSource {
        calls: AtomicUsize,
        netblocks: CidrSet,
    }

    impl FixedSource {
        fn new(blocks: &[&str]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                netblocks: blocks.iter().copied().collect(),
            }
        }

        fn record(&self, asn: u32, address: Option<IpAddr>) -> OwnershipRecord {
            OwnershipRecord {
                asn,
                address,
                prefix: self
                    .netblocks
                    .select_prefix(address)
                    .unwrap_or_default()
                    .to_string(),
                country_code: "US".to_string(),
                description: "Example Net, US".to_string(),
                netblocks: self.netblocks.clone(),
                tag: SourceType::Api,
                source: "fixed".to_string(),
            }
        }
    }

    #[async_trait]
    impl DataSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        fn source_type(&self) -> SourceType {
            SourceType::Api
        }

        async fn resolve_by_address(
            &self,
            _ctx: &SourceContext,
            addr: IpAddr,
        ) -> Result<OwnershipRecord, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.netblocks.contains_address(addr) {
                Ok(self.record(64500, Some(addr)))
            } else {
                Err(ResolveError::NoAsnMatch(addr))
            }
        }

        async fn resolve_by_asn(
            &self,
            _ctx: &SourceContext,
            asn: u32,
            _known: CidrSet,
        ) -> Result<OwnershipRecord, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.record(asn, None))
        }
    }

    fn ctx(bus: &EventBus) -> SourceContext {
        SourceContext::new(bus.clone(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_success_publishes_record() {
        let bus = EventBus::new();
        let mut records = bus.subscribe(EventFilter::topics(vec![Topic::NewAsn]));
        let source = FixedSource::new(&["198.51.100.0/24"]);
        let request = ResolutionRequest::new(Query::Address("198.51.100.7".parse().unwrap()));

        assert!(handle_request(&source, &ctx(&bus), &request).await);

        let message = records.recv().await.unwrap();
        assert_eq!(message.priority, Priority::High);
        match message.event {
            BusEvent::NewAsn(record) => {
                assert_eq!(record.asn, 64500);
                assert_eq!(record.prefix, "198.51.100.0/24");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_publishes_log_only() {
        let bus = EventBus::new();
        let mut all = bus.subscribe(EventFilter::all());
        let source = FixedSource::new(&["198.51.100.0/24"]);
        let request = ResolutionRequest::new(Query::Address("192.0.2.1".parse().unwrap()));

        assert!(!handle_request(&source, &ctx(&bus), &request).await);

        let message = all.recv().await.unwrap();
        match message.event {
            BusEvent::Log { source, message } => {
                assert_eq!(source, "fixed");
                assert_eq!(message, "fixed: no candidate AS contains 192.0.2.1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(all.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incomplete_record_is_discarded() {
        let bus = EventBus::new();
        let mut records = bus.subscribe(EventFilter::topics(vec![Topic::NewAsn]));
        let source = FixedSource::new(&[]);

        let request = ResolutionRequest::new(Query::Asn(64500));

        assert!(!handle_request(&source, &ctx(&bus), &request).await);
        assert!(records.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_spawned_worker_answers_requests() {
        let bus = EventBus::new();
        let cancel = CancellationToken::new();
        let mut records = bus.subscribe(EventFilter::topics(vec![Topic::NewAsn]));
        let source = Arc::new(FixedSource::new(&["203.0.113.0/24"]));
        let handle = spawn_source(source.clone(), &bus, cancel.clone());

        bus.publish(
            Priority::High,
            BusEvent::AsnRequest(ResolutionRequest::new(Query::Asn(64501))),
        );
        let message = tokio::time::timeout(Duration::from_secs(2), records.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(message.event, BusEvent::NewAsn(r) if r.asn == 64501));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_announces_queue_progress() {
        let bus = EventBus::new();
        let cancel = CancellationToken::new();
        let mut progress = bus.subscribe(EventFilter::topics(vec![Topic::Progress]));
        let source = Arc::new(FixedSource::new(&["203.0.113.0/24"]));
        let handle = spawn_source(source.clone(), &bus, cancel.clone());

        let first = ResolutionRequest::new(Query::Asn(64501));
        let second = ResolutionRequest::new(Query::Asn(64502));
        let ids = (first.id, second.id);
        bus.publish(Priority::High, BusEvent::AsnRequest(first));
        bus.publish(Priority::High, BusEvent::AsnRequest(second));

        let mut seen = Vec::new();
        while seen.len() < 6 {
            let message = tokio::time::timeout(Duration::from_secs(2), progress.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(message.priority, Priority::Critical);
            match message.event {
                BusEvent::RequestQueued { id, source } => {
                    assert_eq!(source, "fixed");
                    seen.push(("queued", id));
                }
                BusEvent::RequestStarted { id, source } => {
                    assert_eq!(source, "fixed");
                    seen.push(("started", id));
                }
                BusEvent::RequestFinished { id, source } => {
                    assert_eq!(source, "fixed");
                    seen.push(("finished", id));
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }

        // Each request is queued, started and finished, one at a time
        let position = |entry| seen.iter().position(|e| *e == entry).unwrap();
        assert!(position(("queued", ids.0)) < position(("started", ids.0)));
        assert!(position(("queued", ids.1)) < position(("started", ids.1)));
        assert!(position(("started", ids.0)) < position(("finished", ids.0)));
        assert!(position(("finished", ids.0)) < position(("started", ids.1)));
        assert!(position(("started", ids.1)) < position(("finished", ids.1)));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_small_bus_does_not_drop_queued_requests() {
        struct SlowSource(AtomicUsize);

        #[async_trait]
        impl DataSource for SlowSource {
            fn name(&self) -> &str {
                "slow"
            }

            fn source_type(&self) -> SourceType {
                SourceType::Scrape
            }

            async fn resolve_by_address(
                &self,
                _ctx: &SourceContext,
                addr: IpAddr,
            ) -> Result<OwnershipRecord, ResolveError> {
                Err(ResolveError::NoAsnMatch(addr))
            }

            async fn resolve_by_asn(
                &self,
                _ctx: &SourceContext,
                asn: u32,
                _known: CidrSet,
            ) -> Result<OwnershipRecord, ResolveError> {
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(ResolveError::NoData(format!("AS{asn}")))
            }
        }

        // Far more requests than the bus buffers, arriving while busy
        let bus = EventBus::with_capacity(4);
        let cancel = CancellationToken::new();
        let source = Arc::new(SlowSource(AtomicUsize::new(0)));
        let handle = spawn_source(source.clone(), &bus, cancel.clone());

        for asn in 64500..64512 {
            bus.publish(
                Priority::High,
                BusEvent::AsnRequest(ResolutionRequest::new(Query::Asn(asn))),
            );
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while source.0.load(Ordering::SeqCst) < 12 {
            assert!(tokio::time::Instant::now() < deadline, "requests were dropped");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    /// Knows the neighbours of example.com only
    struct NeighbourSource;

    #[async_trait]
    impl DataSource for NeighbourSource {
        fn name(&self) -> &str {
            "neighbours"
        }

        fn source_type(&self) -> SourceType {
            SourceType::Scrape
        }

        async fn resolve_by_address(
            &self,
            _ctx: &SourceContext,
            addr: IpAddr,
        ) -> Result<OwnershipRecord, ResolveError> {
            Err(ResolveError::NoAsnMatch(addr))
        }

        async fn resolve_by_asn(
            &self,
            _ctx: &SourceContext,
            asn: u32,
            _known: CidrSet,
        ) -> Result<OwnershipRecord, ResolveError> {
            Err(ResolveError::NoData(format!("AS{asn}")))
        }

        async fn domains_in_network(
            &self,
            _ctx: &SourceContext,
            domain: &str,
        ) -> Result<std::collections::BTreeSet<String>, ResolveError> {
            match domain {
                "example.com" => Ok(["mail.example.net", "www.example.org"]
                    .into_iter()
                    .map(String::from)
                    .collect()),
                "quiet.example" => Ok(Default::default()),
                _ => Err(ResolveError::Transport("connection refused".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_whois_publishes_found_domains() {
        let bus = EventBus::new();
        let mut all = bus.subscribe(EventFilter::all());
        let request = WhoisRequest::new("example.com").unwrap();

        assert!(handle_whois(&NeighbourSource, &ctx(&bus), &request).await);

        let message = all.recv().await.unwrap();
        assert_eq!(message.priority, Priority::High);
        match message.event {
            BusEvent::NewWhois(record) => {
                assert_eq!(record.request_id, request.id);
                assert_eq!(record.domain, "example.com");
                assert_eq!(record.source, "neighbours");
                assert_eq!(record.tag, SourceType::Scrape);
                assert!(record.new_domains.contains("www.example.org"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(all.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_whois_without_findings_or_failing() {
        let bus = EventBus::new();
        let mut all = bus.subscribe(EventFilter::all());

        let quiet = WhoisRequest::new("quiet.example").unwrap();
        assert!(!handle_whois(&NeighbourSource, &ctx(&bus), &quiet).await);
        assert!(all.try_recv().unwrap().is_none());

        let failing = WhoisRequest::new("down.example").unwrap();
        assert!(!handle_whois(&NeighbourSource, &ctx(&bus), &failing).await);
        match all.recv().await.unwrap().event {
            BusEvent::Log { source, message } => {
                assert_eq!(source, "neighbours");
                assert_eq!(
                    message,
                    "neighbours: down.example: transport error: connection refused"
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawned_worker_answers_whois_requests() {
        let bus = EventBus::new();
        let cancel = CancellationToken::new();
        let mut found = bus.subscribe(EventFilter::topics(vec![Topic::NewWhois]));
        let handle = spawn_source(Arc::new(NeighbourSource), &bus, cancel.clone());

        let request = WhoisRequest::new("example.com").unwrap();
        let id = request.id;
        bus.publish(Priority::High, BusEvent::WhoisRequest(request));

        let message = tokio::time::timeout(Duration::from_secs(2), found.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(message.event, BusEvent::NewWhois(r) if r.request_id == id));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
