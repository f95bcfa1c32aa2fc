//! Resolution cache populated from the event bus

use super::record::{OwnershipRecord, Query};
use crate::bus::{BusEvent, EventBus, EventFilter, Topic};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Default)]
struct Entries {
    by_address: HashMap<IpAddr, OwnershipRecord>,
    by_asn: HashMap<u32, OwnershipRecord>,
}

/// Thread-safe store of ownership records keyed by address and by ASN
///
/// Writes are serialized by an internal lock and the last write for a key
/// wins. Lookups never wait for an entry to appear; callers that need to
/// wait use [`ResolutionCache::changed`]. Entries are never evicted.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: RwLock<Entries>,
    changed: Notify,
    updates: AtomicU64,
}

impl ResolutionCache {
    /// Create a new empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record under every key it carries, replacing prior entries
    pub fn update(&self, record: OwnershipRecord) {
        {
            let mut entries = self.entries.write().expect("cache lock poisoned");
            if let Some(addr) = record.address {
                entries.by_address.insert(addr, record.clone());
            }
            if record.asn != 0 {
                entries.by_asn.insert(record.asn, record);
            }
        }
        self.updates.fetch_add(1, Ordering::Relaxed);
        self.changed.notify_waiters();
    }

    /// Pre-populate the cache, e.g. from records already in storage
    pub fn fill(&self, records: impl IntoIterator<Item = OwnershipRecord>) {
        for record in records {
            self.update(record);
        }
    }

    /// Look up the record stored for this exact address
    pub fn by_address(&self, addr: &IpAddr) -> Option<OwnershipRecord> {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries.by_address.get(addr).cloned()
    }

    /// Look up the record stored for an AS number
    pub fn by_asn(&self, asn: u32) -> Option<OwnershipRecord> {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries.by_asn.get(&asn).cloned()
    }

    /// Look up whichever key the query names
    pub fn lookup(&self, query: &Query) -> Option<OwnershipRecord> {
        match query {
            Query::Address(addr) => self.by_address(addr),
            Query::Asn(asn) => self.by_asn(*asn),
        }
    }

    /// Find a record whose netblocks contain `addr`
    ///
    /// An exact address entry is preferred. Otherwise the record with the
    /// most specific containing block wins, ties broken by lowest ASN.
    pub fn covering_address(&self, addr: &IpAddr) -> Option<OwnershipRecord> {
        let entries = self.entries.read().expect("cache lock poisoned");
        if let Some(record) = entries.by_address.get(addr) {
            return Some(record.clone());
        }

        let mut best: Option<(u8, &OwnershipRecord)> = None;
        for record in entries.by_asn.values() {
            let Some(block) = record.netblocks.best_match(*addr) else {
                continue;
            };
            let Ok(net) = block.trim().parse::<ipnet::IpNet>() else {
                continue;
            };
            let len = net.prefix_len();
            match best {
                Some((best_len, best_record))
                    if best_len > len || (best_len == len && best_record.asn < record.asn) => {}
                _ => best = Some((len, record)),
            }
        }

        best.map(|(_, record)| record.clone())
    }

    /// A future that completes on the next cache update
    ///
    /// Create it before checking the cache so an update landing between the
    /// check and the wait is not missed.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// Total number of records stored since creation
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Number of address keys
    pub fn address_count(&self) -> usize {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries.by_address.len()
    }

    /// Number of ASN keys
    pub fn asn_count(&self) -> usize {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries.by_asn.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        let entries = self.entries.read().expect("cache lock poisoned");
        entries.by_address.is_empty() && entries.by_asn.is_empty()
    }

    /// Subscribe to new ownership records on `bus` and store each one
    ///
    /// The subscription is registered before this returns, so records
    /// published afterwards are never missed. The task ends when the bus
    /// closes or `cancel` fires.
    pub fn attach(
        self: &Arc<Self>,
        bus: &EventBus,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut subscription = bus.subscribe(EventFilter::topics(vec![Topic::NewAsn]));
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    message = subscription.recv() => message,
                    _ = cancel.cancelled() => break,
                };
                let Some(message) = message else {
                    break;
                };
                if let BusEvent::NewAsn(record) = message.event {
                    debug!(
                        asn = record.asn,
                        address = ?record.address,
                        source = %record.source,
                        "Caching ownership record"
                    );
                    cache.update(record);
                }
            }
            debug!("Cache subscriber stopped");
        })
    }
}
