//! NetworksDB JSON API

use super::{NetworksDb, NETWORKSDB_NAME};
use crate::asn::{OwnershipRecord, ResolveError};
use crate::config::ApiKey;
use crate::datasrcs::SourceContext;
use crate::netblock::CidrSet;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::net::IpAddr;
use tracing::debug;

const API_PATH: &str = "/api/v1";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    total: u64,
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct IpInfo {
    organisation: Organisation,
    #[serde(default)]
    network: Option<Network>,
}

#[derive(Debug, Deserialize)]
struct Organisation {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Network {
    #[serde(default)]
    cidr: String,
}

#[derive(Debug, Deserialize)]
struct OrgInfo {
    #[serde(default)]
    asns: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct AsInfo {
    #[serde(default)]
    as_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    countrycode: String,
}

/// Unwrap the result list shared by every API response
fn parse_results<T: DeserializeOwned>(url: &str, body: &str) -> Result<Vec<T>, ResolveError> {
    let envelope: Envelope<T> = serde_json::from_str(body)
        .map_err(|e| ResolveError::ExtractionFailed(format!("{url}: {e}")))?;

    if let Some(error) = envelope.error.filter(|e| !e.is_empty()) {
        return Err(ResolveError::NoData(format!("{url}: {error}")));
    }
    if envelope.total == 0 || envelope.results.is_empty() {
        return Err(ResolveError::NoData(format!(
            "{url}: the request returned zero results"
        )));
    }
    Ok(envelope.results)
}

impl NetworksDb {
    async fn api_call<T: DeserializeOwned>(
        &self,
        ctx: &SourceContext,
        key: &ApiKey,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<Vec<T>, ResolveError> {
        let url = format!("{}{API_PATH}/{path}", self.base_url);
        let headers = [("X-Api-Key", key.key.clone())];

        self.throttle(ctx).await?;
        let body = ctx
            .until_cancelled(self.fetcher.post_form(&url, &headers, form))
            .await?;
        parse_results(&url, &body)
    }

    /// Organisation id owning `addr`
    async fn api_ip_info(
        &self,
        ctx: &SourceContext,
        key: &ApiKey,
        addr: IpAddr,
    ) -> Result<String, ResolveError> {
        let results: Vec<IpInfo> = self
            .api_call(ctx, key, "ip/info", &[("ip", addr.to_string())])
            .await?;
        let info = &results[0];
        if info.organisation.id.is_empty() {
            return Err(ResolveError::ExtractionFailed(format!(
                "no organisation id returned for {addr}"
            )));
        }
        if let Some(network) = &info.network {
            debug!(%addr, network = %network.cidr, org = %info.organisation.id, "IP info");
        }
        Ok(info.organisation.id.clone())
    }

    /// Candidate AS numbers for an organisation, in response order
    async fn api_org_asns(
        &self,
        ctx: &SourceContext,
        key: &ApiKey,
        org_id: &str,
    ) -> Result<Vec<u32>, ResolveError> {
        let results: Vec<OrgInfo> = self
            .api_call(ctx, key, "org/info", &[("id", org_id.to_string())])
            .await?;
        let asns: Vec<u32> = results[0].asns.iter().copied().filter(|&a| a != 0).collect();
        if asns.is_empty() {
            return Err(ResolveError::NoData(format!(
                "no AS numbers listed for organisation {org_id}"
            )));
        }
        Ok(asns)
    }

    async fn api_netblocks(
        &self,
        ctx: &SourceContext,
        key: &ApiKey,
        asn: u32,
    ) -> Result<CidrSet, ResolveError> {
        let results: Vec<Network> = self
            .api_call(ctx, key, "as/networks", &[("asn", asn.to_string())])
            .await?;
        let netblocks: CidrSet = results
            .into_iter()
            .map(|n| n.cidr.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if netblocks.is_empty() {
            return Err(ResolveError::NoData(format!(
                "no netblocks listed for AS{asn}"
            )));
        }
        Ok(netblocks)
    }

    /// Country code and owner name for `asn`
    async fn api_as_info(
        &self,
        ctx: &SourceContext,
        key: &ApiKey,
        asn: u32,
    ) -> Result<(String, String), ResolveError> {
        let mut results: Vec<AsInfo> = self
            .api_call(ctx, key, "as/info", &[("asn", asn.to_string())])
            .await?;
        let info = results.swap_remove(0);
        let name = if info.description.trim().is_empty() {
            info.as_name
        } else {
            info.description
        };
        Ok((info.countrycode, name))
    }

    pub(super) async fn api_resolve_address(
        &self,
        ctx: &SourceContext,
        key: &ApiKey,
        addr: IpAddr,
    ) -> Result<OwnershipRecord, ResolveError> {
        let org_id = self.api_ip_info(ctx, key, addr).await?;
        let candidates = self.api_org_asns(ctx, key, &org_id).await?;

        for asn in candidates {
            match self.api_netblocks(ctx, key, asn).await {
                Ok(netblocks) if netblocks.contains_address(addr) => {
                    return self
                        .api_resolve_asn(ctx, key, asn, Some(addr), netblocks)
                        .await;
                }
                Ok(_) => debug!(%addr, asn, "Candidate AS does not contain address"),
                Err(ResolveError::Cancelled) => return Err(ResolveError::Cancelled),
                Err(e) => ctx.log(NETWORKSDB_NAME, format!("{NETWORKSDB_NAME}: AS{asn}: {e}")),
            }
        }

        Err(ResolveError::NoAsnMatch(addr))
    }

    pub(super) async fn api_resolve_asn(
        &self,
        ctx: &SourceContext,
        key: &ApiKey,
        asn: u32,
        address: Option<IpAddr>,
        known_netblocks: CidrSet,
    ) -> Result<OwnershipRecord, ResolveError> {
        let netblocks = if known_netblocks.is_empty() {
            self.api_netblocks(ctx, key, asn).await?
        } else {
            known_netblocks
        };
        let (country_code, name) = self.api_as_info(ctx, key, asn).await?;
        self.record(asn, address, netblocks, country_code, &name)
    }
}
