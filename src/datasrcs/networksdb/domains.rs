//! Related-domain lookup scraped from NetworksDB network pages

use super::scrape::capture;
use super::{NetworksDb, NETWORKSDB_NAME};
use crate::asn::ResolveError;
use crate::datasrcs::SourceContext;
use ipnet::IpNet;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::debug;

static IP_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<a class="link_sm" href="(/ip/[.:a-zA-Z0-9]+)">"#).expect("valid regex")
});

static NETWORK_CIDR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<b>Network:.*href="[^"]*".*href="[^"]*">([^<]*)</a>"#).expect("valid regex")
});

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:(?:[a-zA-Z0-9]|[_a-zA-Z0-9][_a-zA-Z0-9-]{0,61}[a-zA-Z0-9])\.)+[a-zA-Z]{2,61}")
        .expect("valid regex")
});

const DOMAINS_HEADING: &str = "Domains in network";
const TABLE_START: &str = "<table class";

/// The part of a domains-in-network page between its heading and table
fn domain_section(page: &str) -> Option<&str> {
    let start = page.find(DOMAINS_HEADING)? + DOMAINS_HEADING.len();
    let end = start + page[start..].find(TABLE_START)? + TABLE_START.len();
    Some(&page[start..end])
}

fn extract_domains(section: &str) -> BTreeSet<String> {
    DOMAIN_RE
        .find_iter(section)
        .map(|m| m.as_str().trim().to_ascii_lowercase())
        .collect()
}

impl NetworksDb {
    /// Collect the domains hosted in every network `domain` resolves into
    ///
    /// A network page that cannot be read is logged and skipped.
    pub(super) async fn scrape_domains_in_network(
        &self,
        ctx: &SourceContext,
        domain: &str,
    ) -> Result<BTreeSet<String>, ResolveError> {
        let url = format!("{}/domain-to-ips/{domain}", self.base_url);
        let page = self.get(ctx, &url).await?;
        let links: BTreeSet<&str> = IP_LINK_RE
            .captures_iter(&page)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .collect();
        if links.is_empty() {
            return Err(ResolveError::ExtractionFailed(format!(
                "{url}: failed to extract the IP page links"
            )));
        }

        let mut found = BTreeSet::new();
        for link in links {
            let ip_url = format!("{}{link}", self.base_url);
            match self.network_domains(ctx, &ip_url).await {
                Ok(domains) => found.extend(domains),
                Err(ResolveError::Cancelled) => return Err(ResolveError::Cancelled),
                Err(e) => ctx.log(NETWORKSDB_NAME, format!("{NETWORKSDB_NAME}: {e}")),
            }
        }
        debug!(domain, found = found.len(), "Scraped related domains");
        Ok(found)
    }

    async fn network_domains(
        &self,
        ctx: &SourceContext,
        ip_url: &str,
    ) -> Result<BTreeSet<String>, ResolveError> {
        let page = self.get(ctx, ip_url).await?;
        let cidr = capture(&NETWORK_CIDR_RE, &page).ok_or_else(|| {
            ResolveError::ExtractionFailed(format!("{ip_url}: failed to extract the CIDR"))
        })?;
        let network: IpNet = cidr.parse().map_err(|_| {
            ResolveError::ExtractionFailed(format!("{ip_url}: invalid CIDR {cidr:?}"))
        })?;

        let url = format!(
            "{}/domains-in-network/{}/{}",
            self.base_url,
            network.network(),
            network.broadcast()
        );
        let page = self.get(ctx, &url).await?;
        let section = domain_section(&page).ok_or_else(|| {
            ResolveError::ExtractionFailed(format!(
                "{url}: failed to extract the domain section of the page"
            ))
        })?;
        Ok(extract_domains(section))
    }
}
