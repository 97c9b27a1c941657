//! Proxy representation and rank bookkeeping.

use governor::{clock::DefaultClock, middleware::NoOpMiddleware, state::{InMemoryState, NotKeyed}, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Representation of a proxy server.
///
/// Identity is the `(host, port)` pair; two proxies with the same address
/// are the same proxy regardless of rank or metadata.
#[derive(Debug, Clone)]
pub struct Proxy {
    /// Host name or IP address of the proxy.
    pub host: String,
    /// Port the proxy listens on.
    pub port: u16,
    /// Country reported by the listing source, if any.
    pub country: Option<String>,
    /// Whether the proxy advertises HTTPS support.
    pub https: bool,
    /// Reliability score driving selection priority and eviction.
    pub rank: i32,
    /// Rate limiter to control requests per second through this proxy.
    pub limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>,
}

impl Proxy {
    /// Create a new proxy with the given address, rank and rate limit.
    pub fn new(host: impl Into<String>, port: u16, rank: i32, max_rps: f64) -> Self {
        // Create a rate limiter for this proxy
        let quota = Quota::per_second(NonZeroU32::new(max_rps.ceil() as u32).unwrap_or(NonZeroU32::new(1).unwrap()));
        let limiter = Arc::new(RateLimiter::direct(quota));

        Self {
            host: host.into(),
            port,
            country: None,
            https: false,
            rank,
            limiter,
        }
    }

    /// The `host:port` form of the address, used in log lines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The proxy URL handed to the HTTP transport.
    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Convert the proxy into a reqwest::Proxy.
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy, reqwest::Error> {
        reqwest::Proxy::all(self.proxy_url())
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for Proxy {}
