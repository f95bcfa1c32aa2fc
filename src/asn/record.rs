//! Ownership records and resolution requests

use super::error::ResolveError;
use crate::netblock::CidrSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// How a data source obtained its answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Authenticated JSON API
    Api,
    /// Scraped web pages
    Scrape,
}

impl SourceType {
    /// Short tag used in output and storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Api => "api",
            SourceType::Scrape => "scrape",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved ownership fact for a block of address space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    /// Autonomous System Number, always non-zero
    pub asn: u32,
    /// The address that triggered resolution, if any
    pub address: Option<IpAddr>,
    /// Block judged to contain `address`, or some member of `netblocks`
    pub prefix: String,
    /// Two-letter country code (e.g. "US")
    pub country_code: String,
    /// Human-readable name and country (e.g. "Example Net, US")
    pub description: String,
    /// Every block discovered for this AS during the resolution
    pub netblocks: CidrSet,
    /// Whether the record came from an API or a scrape
    pub tag: SourceType,
    /// Name of the data source that produced the record
    pub source: String,
}

impl OwnershipRecord {
    /// Check the publication invariants: a non-zero ASN, non-empty
    /// netblocks, and a prefix that is one of them
    pub fn is_well_formed(&self) -> bool {
        self.asn != 0 && !self.netblocks.is_empty() && self.netblocks.contains(&self.prefix)
    }
}

/// The key a resolution is requested for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Query {
    /// Resolve the owner of an IP address
    Address(IpAddr),
    /// Resolve the details of an AS number
    Asn(u32),
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Address(addr) => write!(f, "{addr}"),
            Query::Asn(asn) => write!(f, "AS{asn}"),
        }
    }
}

impl FromStr for Query {
    type Err = ResolveError;

    /// Accepts an IP address, `AS64500`/`as64500`, or a bare AS number
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(addr) = s.parse::<IpAddr>() {
            return Ok(Query::Address(addr));
        }

        let digits = s
            .strip_prefix("AS")
            .or_else(|| s.strip_prefix("as"))
            .or_else(|| s.strip_prefix("As"))
            .unwrap_or(s);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ResolveError::InvalidRequest(format!(
                "not an IP address or AS number: {s:?}"
            )));
        }
        match digits.parse::<u32>() {
            Ok(0) => Err(ResolveError::InvalidRequest(
                "AS number must be positive".to_string(),
            )),
            Ok(asn) => Ok(Query::Asn(asn)),
            Err(_) => Err(ResolveError::InvalidRequest(format!(
                "not an IP address or AS number: {s:?}"
            ))),
        }
    }
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate an id shared by every kind of bus request
pub(crate) fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// A request published to every registered data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRequest {
    /// Process-unique id for correlating log lines
    pub id: u64,
    /// The key to resolve
    pub query: Query,
}

impl ResolutionRequest {
    /// Create a request for a query key
    pub fn new(query: Query) -> Self {
        Self {
            id: next_request_id(),
            query,
        }
    }

    /// Build a request from optional parts
    ///
    /// The address takes precedence when both are given. A request with
    /// neither key (or only ASN 0) is rejected.
    pub fn from_parts(address: Option<IpAddr>, asn: Option<u32>) -> Result<Self, ResolveError> {
        match (address, asn) {
            (Some(addr), _) => Ok(Self::new(Query::Address(addr))),
            (None, Some(asn)) if asn != 0 => Ok(Self::new(Query::Asn(asn))),
            _ => Err(ResolveError::InvalidRequest(
                "a request needs an address or a positive AS number".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> OwnershipRecord {
        OwnershipRecord {
            asn: 64500,
            address: Some("198.51.100.7".parse().unwrap()),
            prefix: "198.51.100.0/24".to_string(),
            country_code: "US".to_string(),
            description: "Example Net, US".to_string(),
            netblocks: ["198.51.100.0/24"].into_iter().collect(),
            tag: SourceType::Api,
            source: "NetworksDB".to_string(),
        }
    }

    #[test]
    fn test_record_well_formed() {
        let record = sample_record();
        assert!(record.is_well_formed());

        let mut bad = record.clone();
        bad.prefix = "203.0.113.0/24".to_string();
        assert!(!bad.is_well_formed());

        let mut bad = record.clone();
        bad.netblocks = CidrSet::new();
        assert!(!bad.is_well_formed());

        let mut bad = record;
        bad.asn = 0;
        assert!(!bad.is_well_formed());
    }

    #[test]
    fn test_query_parsing() {
        assert_eq!(
            "198.51.100.7".parse::<Query>().unwrap(),
            Query::Address("198.51.100.7".parse().unwrap())
        );
        assert_eq!(
            "2001:db8::1".parse::<Query>().unwrap(),
            Query::Address("2001:db8::1".parse().unwrap())
        );
        assert_eq!("AS64500".parse::<Query>().unwrap(), Query::Asn(64500));
        assert_eq!("as64500".parse::<Query>().unwrap(), Query::Asn(64500));
        assert_eq!(" 64500 ".parse::<Query>().unwrap(), Query::Asn(64500));

        assert!(matches!(
            "AS0".parse::<Query>(),
            Err(ResolveError::InvalidRequest(_))
        ));
        assert!(matches!(
            "example.com".parse::<Query>(),
            Err(ResolveError::InvalidRequest(_))
        ));
        assert!(matches!(
            "".parse::<Query>(),
            Err(ResolveError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_query_rejects_signed_and_padded_numbers() {
        let inputs = [
            "AS+64500",
            "+64500",
            "AS-1",
            "AS",
            "AS 64500",
            "AS64500x",
            "AS4294967296",
        ];
        for input in inputs {
            assert!(
                matches!(input.parse::<Query>(), Err(ResolveError::InvalidRequest(_))),
                "{input:?} should be rejected"
            );
        }
        assert_eq!("AS4294967295".parse::<Query>().unwrap(), Query::Asn(u32::MAX));
    }

    #[test]
    fn test_query_display() {
        assert_eq!(Query::Asn(64500).to_string(), "AS64500");
        assert_eq!(
            Query::Address("192.0.2.1".parse().unwrap()).to_string(),
            "192.0.2.1"
        );
    }

    #[test]
    fn test_request_from_parts() {
        let addr: IpAddr = "192.0.2.1".parse().unwrap();

        let req = ResolutionRequest::from_parts(Some(addr), None).unwrap();
        assert_eq!(req.query, Query::Address(addr));

        let req = ResolutionRequest::from_parts(None, Some(64500)).unwrap();
        assert_eq!(req.query, Query::Asn(64500));

        let req = ResolutionRequest::from_parts(Some(addr), Some(64500)).unwrap();
        assert_eq!(req.query, Query::Address(addr));

        assert!(ResolutionRequest::from_parts(None, None).is_err());
        assert!(ResolutionRequest::from_parts(None, Some(0)).is_err());
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = ResolutionRequest::new(Query::Asn(1));
        let b = ResolutionRequest::new(Query::Asn(1));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_source_type_tags() {
        assert_eq!(SourceType::Api.to_string(), "api");
        assert_eq!(SourceType::Scrape.as_str(), "scrape");
        assert_eq!(serde_json::to_string(&SourceType::Scrape).unwrap(), "\"scrape\"");
    }
}
