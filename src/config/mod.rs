//! Configuration for a resolution run

pub mod timing;

pub use timing::TimingConfig;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default base URL of the NetworksDB data source
pub const DEFAULT_NETWORKSDB_BASE_URL: &str = "https://networksdb.io";

/// Default number of messages buffered per bus subscriber
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Credential for an authenticated data source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Key sent with every API request
    pub key: String,
}

impl ApiKey {
    /// Wrap a raw key string
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Configuration for a resolution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Credentials keyed by data source name (e.g. "NetworksDB")
    pub api_keys: HashMap<String, ApiKey>,
    /// Minimum spacing between one adapter's outbound calls (default: 3s)
    pub rate_limit: Duration,
    /// Cache re-check interval while waiting for a resolution (default: 1s)
    pub poll_interval: Duration,
    /// Upper bound on a single resolution (default: 60s)
    pub resolve_timeout: Duration,
    /// Per-request HTTP timeout (default: 20s)
    pub http_timeout: Duration,
    /// Base URL for the NetworksDB data source
    pub networksdb_base_url: String,
    /// Root domains considered in scope; empty means everything is
    pub domains: Vec<String>,
    /// Messages buffered per bus subscriber (default: 1000)
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_keys: HashMap::new(),
            rate_limit: timing::rate_limit(),
            poll_interval: timing::poll_interval(),
            resolve_timeout: timing::resolve_timeout(),
            http_timeout: timing::http_timeout(),
            networksdb_base_url: DEFAULT_NETWORKSDB_BASE_URL.to_string(),
            domains: Vec::new(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Create a new Config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Return the credential for a data source, if one was configured
    ///
    /// An empty key counts as absent.
    pub fn api_key(&self, source: &str) -> Option<&ApiKey> {
        self.api_keys
            .get(source)
            .filter(|api| !api.key.trim().is_empty())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be greater than 0".to_string());
        }
        if self.resolve_timeout.is_zero() {
            return Err("resolve_timeout must be greater than 0".to_string());
        }
        if self.http_timeout.is_zero() {
            return Err("http_timeout must be greater than 0".to_string());
        }
        if self.networksdb_base_url.trim().is_empty() {
            return Err("networksdb_base_url must not be empty".to_string());
        }
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Check whether `name` equals or is a subdomain of any entry in `scope`
///
/// An empty scope admits every name.
pub fn domain_name_in_scope(name: &str, scope: &[String]) -> bool {
    if scope.is_empty() {
        return true;
    }
    let name = name.trim().to_ascii_lowercase();

    scope.iter().any(|domain| {
        let domain = domain.trim().to_ascii_lowercase();
        !domain.is_empty() && (name == domain || name.ends_with(&format!(".{domain}")))
    })
}

/// Builder for Config
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the credential for a data source
    pub fn api_key(mut self, source: impl Into<String>, key: impl Into<String>) -> Self {
        self.config.api_keys.insert(source.into(), ApiKey::new(key));
        self
    }

    /// Set the per-adapter rate limit interval
    pub fn rate_limit(mut self, interval: Duration) -> Self {
        self.config.rate_limit = interval;
        self
    }

    /// Set the cache poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the resolution timeout
    pub fn resolve_timeout(mut self, timeout: Duration) -> Self {
        self.config.resolve_timeout = timeout;
        self
    }

    /// Set the HTTP request timeout
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.config.http_timeout = timeout;
        self
    }

    /// Set the NetworksDB base URL
    pub fn networksdb_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.networksdb_base_url = url.into();
        self
    }

    /// Add an in-scope root domain
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.config.domains.push(domain.into());
        self
    }

    /// Set the per-subscriber bus buffer size
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
