//! Persistence seam for resolved infrastructure facts

use crate::asn::{OwnershipRecord, SourceType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Mutex;

/// One address joined with its owning network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfrastructureFact {
    /// Owning AS number
    pub asn: u32,
    /// Owner name and country
    pub description: String,
    /// The address the fact is about
    pub address: IpAddr,
    /// Block that contains `address`
    pub prefix: String,
    /// Data source that produced the ownership record
    pub source: String,
    /// Whether that source answered from an API or a scrape
    pub tag: SourceType,
}

impl InfrastructureFact {
    /// Build a fact for `address` from a record covering it
    ///
    /// When the record was resolved for a different address, the most
    /// specific netblock containing `address` is used as the prefix.
    pub fn from_record(record: &OwnershipRecord, address: IpAddr) -> Self {
        let prefix = if record.address == Some(address) {
            record.prefix.clone()
        } else {
            record
                .netblocks
                .best_match(address)
                .unwrap_or(record.prefix.as_str())
                .to_string()
        };

        Self {
            asn: record.asn,
            description: record.description.clone(),
            address,
            prefix,
            source: record.source.clone(),
            tag: record.tag,
        }
    }
}

/// Destination for infrastructure facts produced by a healing pass
#[async_trait]
pub trait InfrastructureStore: Send + Sync {
    /// Record `fact` as part of the enumeration identified by `run_id`
    async fn insert_infrastructure(&self, fact: &InfrastructureFact, run_id: &str)
        -> anyhow::Result<()>;
}

/// In-memory [`InfrastructureStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    facts: Mutex<Vec<(String, InfrastructureFact)>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fact stored for `run_id`, in insertion order
    pub fn facts(&self, run_id: &str) -> Vec<InfrastructureFact> {
        self.facts
            .lock()
            .expect("mutex poisoned")
            .iter()
            .filter(|(run, _)| run == run_id)
            .map(|(_, fact)| fact.clone())
            .collect()
    }

    /// Total number of stored facts across all runs
    pub fn len(&self) -> usize {
        self.facts.lock().expect("mutex poisoned").len()
    }

    /// Check if nothing has been stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl InfrastructureStore for MemoryStore {
    async fn insert_infrastructure(
        &self,
        fact: &InfrastructureFact,
        run_id: &str,
    ) -> anyhow::Result<()> {
        if run_id.is_empty() {
            anyhow::bail!("run id must not be empty");
        }
        self.facts
            .lock()
            .expect("mutex poisoned")
            .push((run_id.to_string(), fact.clone()));
        Ok(())
    }
}
