//! NetworksDB data source
//!
//! Runs in one of two modes, chosen when the source is built: the JSON API
//! when a credential is configured, page scraping otherwise. Related-domain
//! lookups always scrape.

mod api;
mod domains;
mod scrape;

use super::{DataSource, HttpFetcher, SourceContext};
use crate::asn::{OwnershipRecord, ResolveError, SourceType};
use crate::config::{domain_name_in_scope, ApiKey, Config};
use crate::netblock::CidrSet;
use crate::ratelimit::RateLimiter;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Source name used for provenance and credential lookup
pub const NETWORKSDB_NAME: &str = "NetworksDB";

enum Mode {
    Api(ApiKey),
    Scrape,
}

/// NetworksDB-backed [`DataSource`]
pub struct NetworksDb {
    base_url: String,
    mode: Mode,
    fetcher: Arc<dyn HttpFetcher>,
    limiter: RateLimiter,
    scope: Vec<String>,
}

impl NetworksDb {
    /// Create the source; an absent or blank key selects scrape mode
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<ApiKey>,
        rate_limit: Duration,
        fetcher: Arc<dyn HttpFetcher>,
    ) -> Self {
        let mode = match api_key {
            Some(key) if !key.key.trim().is_empty() => Mode::Api(key),
            _ => {
                info!(source = NETWORKSDB_NAME, "API key data was not provided");
                Mode::Scrape
            }
        };

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mode,
            fetcher,
            limiter: RateLimiter::new(rate_limit),
            scope: Vec::new(),
        }
    }

    /// Restrict related-domain lookups to these root domains
    pub fn with_scope(mut self, domains: Vec<String>) -> Self {
        self.scope = domains;
        self
    }

    /// Create the source from the run configuration
    pub fn from_config(config: &Config, fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self::new(
            config.networksdb_base_url.clone(),
            config.api_key(NETWORKSDB_NAME).cloned(),
            config.rate_limit,
            fetcher,
        )
        .with_scope(config.domains.clone())
    }

    /// Check if the source is using the API
    pub fn has_api_key(&self) -> bool {
        matches!(self.mode, Mode::Api(_))
    }

    /// Base URL all requests are made against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Wait for the rate limiter, then announce activity
    async fn throttle(&self, ctx: &SourceContext) -> Result<(), ResolveError> {
        self.limiter.wait_or_cancel(ctx.cancel()).await?;
        ctx.set_active(NETWORKSDB_NAME);
        Ok(())
    }

    async fn get(&self, ctx: &SourceContext, url: &str) -> Result<String, ResolveError> {
        self.throttle(ctx).await?;
        ctx.until_cancelled(self.fetcher.get(url)).await
    }

    fn record(
        &self,
        asn: u32,
        address: Option<IpAddr>,
        netblocks: CidrSet,
        country_code: String,
        name: &str,
    ) -> Result<OwnershipRecord, ResolveError> {
        let prefix = netblocks
            .select_prefix(address)
            .ok_or_else(|| ResolveError::NoData(format!("no netblocks found for AS{asn}")))?
            .to_string();

        Ok(OwnershipRecord {
            asn,
            address,
            prefix,
            description: format!("{}, {}", name.trim(), country_code),
            country_code,
            netblocks,
            tag: self.source_type(),
            source: NETWORKSDB_NAME.to_string(),
        })
    }
}

impl fmt::Debug for NetworksDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworksDb")
            .field("base_url", &self.base_url)
            .field("api", &self.has_api_key())
            .field("rate_limit", &self.limiter.interval())
            .field("scope", &self.scope)
            .finish()
    }
}

#[async_trait]
impl DataSource for NetworksDb {
    fn name(&self) -> &str {
        NETWORKSDB_NAME
    }

    fn source_type(&self) -> SourceType {
        match self.mode {
            Mode::Api(_) => SourceType::Api,
            Mode::Scrape => SourceType::Scrape,
        }
    }

    async fn resolve_by_address(
        &self,
        ctx: &SourceContext,
        addr: IpAddr,
    ) -> Result<OwnershipRecord, ResolveError> {
        match &self.mode {
            Mode::Api(key) => self.api_resolve_address(ctx, key, addr).await,
            Mode::Scrape => self.scrape_resolve_address(ctx, addr).await,
        }
    }

    async fn resolve_by_asn(
        &self,
        ctx: &SourceContext,
        asn: u32,
        known_netblocks: CidrSet,
    ) -> Result<OwnershipRecord, ResolveError> {
        if asn == 0 {
            return Err(ResolveError::InvalidRequest(
                "AS number must be positive".to_string(),
            ));
        }
        match &self.mode {
            Mode::Api(key) => {
                self.api_resolve_asn(ctx, key, asn, None, known_netblocks)
                    .await
            }
            Mode::Scrape => {
                self.scrape_resolve_asn(ctx, asn, None, known_netblocks, None)
                    .await
            }
        }
    }

    async fn domains_in_network(
        &self,
        ctx: &SourceContext,
        domain: &str,
    ) -> Result<BTreeSet<String>, ResolveError> {
        if !domain_name_in_scope(domain, &self.scope) {
            debug!(domain, "Skipping out-of-scope whois request");
            return Ok(BTreeSet::new());
        }
        self.scrape_domains_in_network(ctx, domain).await
    }
}
