//! Error types for ownership resolution

use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while resolving an ownership record
///
/// Adapter-side failures (`Transport`, `ExtractionFailed`, `NoData`,
/// `NoAsnMatch`) stay local to one attempt: they are logged on the bus and
/// never reach the caller. The caller only ever sees `Timeout`,
/// `Cancelled` or `InvalidRequest`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Network or DNS failure reaching an external source
    #[error("transport error: {0}")]
    Transport(String),

    /// An expected pattern or field was absent from a response
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// The source answered but reported zero results or a service error
    #[error("no data: {0}")]
    NoData(String),

    /// Candidate AS numbers were explored but none contains the address
    #[error("no candidate AS contains {0}")]
    NoAsnMatch(IpAddr),

    /// No record appeared in the cache within the bound
    #[error("resolution timed out after {0:?}")]
    Timeout(Duration),

    /// The caller abandoned the resolution
    #[error("resolution cancelled")]
    Cancelled,

    /// The request cannot be dispatched
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
