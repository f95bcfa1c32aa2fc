//! Global timing configuration with compile-time defaults and runtime overrides
//!
//! Default values are defined as compile-time constants, but can be overridden
//! once at startup via the CLI or library API. `Config::default()` reads these
//! accessors, so an override set before any `Config` is built applies everywhere.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Compile-time defaults as public constants (in milliseconds)
/// Default minimum spacing between one adapter's outbound calls
pub const DEFAULT_RATE_LIMIT_MS: u64 = 3000;
/// Default interval at which the resolver re-checks the cache
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
/// Default upper bound on how long a single resolution may wait
pub const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 60_000;
/// Default per-request HTTP timeout
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 20_000;

/// Timing values that can be overridden at runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Minimum spacing between one adapter's outbound calls
    pub rate_limit: Duration,
    /// Cache re-check interval while waiting for a resolution
    pub poll_interval: Duration,
    /// Upper bound on a single resolution
    pub resolve_timeout: Duration,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            rate_limit: Duration::from_millis(DEFAULT_RATE_LIMIT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            resolve_timeout: Duration::from_millis(DEFAULT_RESOLVE_TIMEOUT_MS),
            http_timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
        }
    }
}

// Runtime override storage - set once at program startup
static OVERRIDE_CONFIG: OnceCell<TimingConfig> = OnceCell::new();

/// Get the per-adapter rate limit interval
pub fn rate_limit() -> Duration {
    OVERRIDE_CONFIG
        .get()
        .map(|c| c.rate_limit)
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_RATE_LIMIT_MS))
}

/// Get the resolver poll interval
pub fn poll_interval() -> Duration {
    OVERRIDE_CONFIG
        .get()
        .map(|c| c.poll_interval)
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_POLL_INTERVAL_MS))
}

/// Get the resolution timeout
pub fn resolve_timeout() -> Duration {
    OVERRIDE_CONFIG
        .get()
        .map(|c| c.resolve_timeout)
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_RESOLVE_TIMEOUT_MS))
}

/// Get the HTTP request timeout
pub fn http_timeout() -> Duration {
    OVERRIDE_CONFIG
        .get()
        .map(|c| c.http_timeout)
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS))
}

/// Set the global timing configuration
///
/// This should be called once at program startup if custom timing is needed.
/// Returns the rejected configuration if one has already been set.
pub fn set_config(config: TimingConfig) -> Result<(), TimingConfig> {
    OVERRIDE_CONFIG.set(config)
}

/// Check if custom timing configuration has been set
pub fn is_custom_config_set() -> bool {
    OVERRIDE_CONFIG.get().is_some()
}
