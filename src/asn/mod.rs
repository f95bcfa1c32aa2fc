//! Ownership records, the resolution cache and the resolver that fronts them

pub mod cache;
pub mod error;
pub mod record;
pub mod service;

pub use cache::ResolutionCache;
pub use error::ResolveError;
pub use record::{OwnershipRecord, Query, ResolutionRequest, SourceType};
pub use service::AsnResolver;
