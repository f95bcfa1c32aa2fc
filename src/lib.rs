//! netowner - network ownership resolution
//!
//! Resolves which Autonomous System and address block an IP address or AS
//! number belongs to. Independent, rate-limited data sources answer
//! requests published on an event bus, and their results converge in a
//! shared resolution cache that callers wait on. The same sources can also
//! list the other domains hosted in the networks a domain resolves into.
//!
//! # Examples
//!
//! ```no_run
//! use netowner::{Config, Services};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::builder().api_key("NetworksDB", "my-key").build()?;
//!     let services = Services::from_config(&config)?;
//!
//!     let record = services
//!         .resolver()
//!         .resolve_address("198.51.100.7".parse()?)
//!         .await?;
//!     println!("{} is in {} (AS{})", "198.51.100.7", record.prefix, record.asn);
//!
//!     services.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod asn;
pub mod bus;
pub mod config;
pub mod datasrcs;
pub mod netblock;
pub mod ratelimit;
pub mod services;
pub mod storage;
pub mod whois;

// Re-export core types for library users
pub use asn::{
    AsnResolver, OwnershipRecord, Query, ResolutionCache, ResolutionRequest, ResolveError,
    SourceType,
};
pub use bus::{BusEvent, EventBus, Priority, Topic};
pub use config::{ApiKey, Config, ConfigBuilder, TimingConfig};
pub use datasrcs::{DataSource, HttpFetcher, NetworksDb, SourceContext};
pub use netblock::CidrSet;
pub use ratelimit::RateLimiter;
pub use services::{Services, ServicesError};
pub use storage::{InfrastructureFact, InfrastructureStore, MemoryStore};
pub use whois::{DomainResolver, WhoisRecord, WhoisRequest};
