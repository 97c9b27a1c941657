//! Configuration for the proxy pool.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the proxy pool and the components built on top of it.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Path of the CSV store the pool is persisted to.
    pub store_path: PathBuf,
    /// Maximum number of proxies kept in the pool.
    pub pool_size: usize,
    /// URLs or file paths to fetch candidate proxy lists from.
    pub sources: Vec<String>,
    /// Maximum number of attempts per request chain.
    pub max_attempts: usize,
    /// Connect and whole-request timeout for a single attempt.
    pub request_timeout: Duration,
    /// Grace interval before the forced reload when the pool runs empty.
    pub reload_grace: Duration,
    /// Maximum requests per second per proxy.
    pub max_requests_per_second: f64,
}

impl PoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }
}

/// Builder for `PoolConfig`.
pub struct PoolConfigBuilder {
    store_path: Option<PathBuf>,
    pool_size: Option<usize>,
    sources: Vec<String>,
    max_attempts: Option<usize>,
    request_timeout: Option<Duration>,
    reload_grace: Option<Duration>,
    max_requests_per_second: Option<f64>,
}

impl PoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            store_path: None,
            pool_size: None,
            sources: Vec::new(),
            max_attempts: None,
            request_timeout: None,
            reload_grace: None,
            max_requests_per_second: None,
        }
    }

    /// Set the path of the CSV store.
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Set the maximum number of proxies kept in the pool.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    /// Set the URLs or file paths to fetch candidate proxy lists from.
    pub fn sources(mut self, sources: Vec<impl Into<String>>) -> Self {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Set the maximum number of attempts per request chain.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set the per-attempt timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the grace interval before the forced reload on an empty pool.
    pub fn reload_grace(mut self, grace: Duration) -> Self {
        self.reload_grace = Some(grace);
        self
    }

    /// Set the maximum requests per second per proxy.
    pub fn max_requests_per_second(mut self, rps: f64) -> Self {
        self.max_requests_per_second = Some(rps);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PoolConfig {
        PoolConfig {
            store_path: self.store_path.unwrap_or_else(|| PathBuf::from("data/proxies.csv")),
            pool_size: self.pool_size.unwrap_or(50),
            sources: self.sources,
            max_attempts: self.max_attempts.unwrap_or(3),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(5)),
            reload_grace: self.reload_grace.unwrap_or(Duration::from_secs(5)),
            max_requests_per_second: self.max_requests_per_second.unwrap_or(5.0),
        }
    }
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
