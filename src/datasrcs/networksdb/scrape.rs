//! NetworksDB page scraping, used when no API key is configured

use super::NetworksDb;
use crate::asn::{OwnershipRecord, ResolveError};
use crate::datasrcs::SourceContext;
use crate::netblock::CidrSet;
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;
use tracing::debug;

static AS_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Announcing ASN:</b> <a class="link_sm" href="([^"]+)""#).expect("valid regex")
});

static CIDR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"CIDR:</b>([^<]*)<br>").expect("valid regex"));

static ASN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"AS Number:</b> ([0-9]*)<br>").expect("valid regex"));

static AS_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"AS Name:</b>([^<]*)<br>").expect("valid regex"));

static COUNTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Location:</b>.*?href="/country/([A-Za-z]{2})">"#).expect("valid regex")
});

pub(super) fn capture<'a>(re: &Regex, page: &'a str) -> Option<&'a str> {
    re.captures(page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Every CIDR block listed on an AS page
fn extract_netblocks(page: &str) -> CidrSet {
    CIDR_RE
        .captures_iter(page)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|cidr| !cidr.is_empty())
        .collect()
}

fn parse_asn(url: &str, page: &str) -> Result<u32, ResolveError> {
    capture(&ASN_RE, page)
        .and_then(|digits| digits.parse::<u32>().ok())
        .filter(|&asn| asn != 0)
        .ok_or_else(|| {
            ResolveError::ExtractionFailed(format!("{url}: failed to extract the AS number"))
        })
}

impl NetworksDb {
    /// Resolve a scraped link against the base URL
    ///
    /// Absolute links are only followed when they stay under the base URL.
    pub(super) fn page_url(&self, link: &str) -> Result<String, ResolveError> {
        if link.starts_with("http://") || link.starts_with("https://") {
            let path = link.strip_prefix(self.base_url.as_str()).ok_or_else(|| {
                ResolveError::ExtractionFailed(format!("link {link:?} leaves {}", self.base_url))
            })?;
            if !path.is_empty() && !path.starts_with('/') {
                return Err(ResolveError::ExtractionFailed(format!(
                    "link {link:?} leaves {}",
                    self.base_url
                )));
            }
            Ok(link.to_string())
        } else if link.starts_with('/') {
            Ok(format!("{}{link}", self.base_url))
        } else {
            Ok(format!("{}/{link}", self.base_url))
        }
    }

    fn as_page_url(&self, asn: u32) -> String {
        format!("{}/autonomous-system/AS{asn}", self.base_url)
    }

    pub(super) async fn scrape_resolve_address(
        &self,
        ctx: &SourceContext,
        addr: IpAddr,
    ) -> Result<OwnershipRecord, ResolveError> {
        let ip_url = format!("{}/ip/{addr}", self.base_url);
        let page = self.get(ctx, &ip_url).await?;
        let link = capture(&AS_LINK_RE, &page).ok_or_else(|| {
            ResolveError::ExtractionFailed(format!(
                "{ip_url}: failed to extract the autonomous system link"
            ))
        })?;

        let as_url = self.page_url(link)?;
        let as_page = self.get(ctx, &as_url).await?;
        let asn = parse_asn(&as_url, &as_page)?;
        let netblocks = extract_netblocks(&as_page);
        debug!(%addr, asn, blocks = netblocks.len(), "Scraped AS page");

        self.scrape_resolve_asn(ctx, asn, Some(addr), netblocks, Some((as_url, as_page)))
            .await
    }

    /// Complete a record from the AS page, fetching it only when `page` is
    /// `None`
    pub(super) async fn scrape_resolve_asn(
        &self,
        ctx: &SourceContext,
        asn: u32,
        address: Option<IpAddr>,
        mut netblocks: CidrSet,
        page: Option<(String, String)>,
    ) -> Result<OwnershipRecord, ResolveError> {
        let (url, page) = match page {
            Some(fetched) => fetched,
            None => {
                let url = self.as_page_url(asn);
                let page = self.get(ctx, &url).await?;
                (url, page)
            }
        };

        let name = capture(&AS_NAME_RE, &page).ok_or_else(|| {
            ResolveError::ExtractionFailed(format!("{url}: failed to extract the AS name"))
        })?;
        let country_code = capture(&COUNTRY_RE, &page)
            .ok_or_else(|| {
                ResolveError::ExtractionFailed(format!("{url}: failed to extract the country code"))
            })?
            .to_uppercase();

        netblocks.extend(extract_netblocks(&page).iter());
        if netblocks.is_empty() {
            return Err(ResolveError::NoData(format!(
                "{url}: no netblocks listed for AS{asn}"
            )));
        }

        self.record(asn, address, netblocks, country_code, name)
    }
}
