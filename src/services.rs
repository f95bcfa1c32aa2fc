//! Service container for a resolution run
//!
//! Wires the event bus, the resolution cache, the log forwarder and one
//! worker per data source together, and hands out the resolvers callers use.

use crate::asn::{AsnResolver, ResolutionCache, ResolveError};
use crate::bus::{spawn_log_forwarder, EventBus};
use crate::config::Config;
use crate::datasrcs::{default_sources, spawn_source, DataSource, ReqwestFetcher};
use crate::whois::DomainResolver;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Errors starting the services for a run
#[derive(Debug, Error)]
pub enum ServicesError {
    /// The configuration failed validation
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The HTTP client could not be built
    #[error(transparent)]
    Http(#[from] ResolveError),
}

/// Running services for one resolution run
///
/// Must be started from within a Tokio runtime. Dropping the container
/// without calling [`Services::shutdown`] cancels the background tasks too.
///
/// # Examples
///
/// ```no_run
/// use netowner::config::Config;
/// use netowner::services::Services;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let services = Services::from_config(&Config::default())?;
///
///     let record = services.resolver().resolve_asn(64500).await?;
///     println!("AS{} {}", record.asn, record.description);
///
///     services.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct Services {
    bus: EventBus,
    cache: Arc<ResolutionCache>,
    resolver: AsnResolver,
    domains: DomainResolver,
    source_names: Vec<String>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Services {
    /// Start services with the default data sources over real HTTP
    pub fn from_config(config: &Config) -> Result<Self, ServicesError> {
        config.validate().map_err(ServicesError::Config)?;
        let fetcher = Arc::new(ReqwestFetcher::new(config.http_timeout)?);
        Ok(Self::start(config, default_sources(config, fetcher)))
    }

    /// Start services with the given data sources and an empty cache
    pub fn start(config: &Config, sources: Vec<Arc<dyn DataSource>>) -> Self {
        Self::start_with_cache(config, sources, ResolutionCache::new())
    }

    /// Start services over a pre-populated cache
    pub fn start_with_cache(
        config: &Config,
        sources: Vec<Arc<dyn DataSource>>,
        cache: ResolutionCache,
    ) -> Self {
        let bus = EventBus::with_capacity(config.channel_capacity);
        let cache = Arc::new(cache);
        let cancel = CancellationToken::new();

        let mut tasks = vec![
            cache.attach(&bus, cancel.child_token()),
            spawn_log_forwarder(&bus, cancel.child_token()),
        ];
        let source_names: Vec<String> =
            sources.iter().map(|s| s.name().to_string()).collect();
        for source in sources {
            debug!(source = source.name(), tag = %source.source_type(), "Starting data source");
            tasks.push(spawn_source(source, &bus, cancel.child_token()));
        }
        info!(sources = ?source_names, "Resolution services started");

        let resolver = AsnResolver::new(
            bus.clone(),
            Arc::clone(&cache),
            config,
            cancel.child_token(),
        );
        let domains = DomainResolver::new(
            bus.clone(),
            source_names.len(),
            config.resolve_timeout,
            cancel.child_token(),
        );

        Self {
            bus,
            cache,
            resolver,
            domains,
            source_names,
            cancel,
            tasks,
        }
    }

    /// The resolver callers query
    pub fn resolver(&self) -> &AsnResolver {
        &self.resolver
    }

    /// The related-domain resolver
    pub fn domains(&self) -> &DomainResolver {
        &self.domains
    }

    /// The cache shared by every component of the run
    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    /// The bus the run communicates over
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Names of the running data sources
    pub fn source_names(&self) -> &[String] {
        &self.source_names
    }

    /// Token that aborts every in-flight resolution when cancelled
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel background work and wait for it to stop
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                debug!(error = %e, "Background task ended abnormally");
            }
        }
        debug!("Resolution services stopped");
    }
}

impl Drop for Services {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("sources", &self.source_names)
            .field("cached_asns", &self.cache.asn_count())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}
