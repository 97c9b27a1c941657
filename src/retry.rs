//! Failure classification and retry coordination for request chains.

use crate::error::PoolExhausted;
use crate::pool::ProxyPool;
use crate::proxy::Proxy;

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sentinel status for transport-level failures that produced no response.
pub const NO_RESPONSE: u16 = 0;

/// Statuses for which retrying is known to be futile, e.g. the resource
/// does not exist.
const TERMINAL_REJECT: [u16; 2] = [400, 404];

/// Statuses that a different proxy or a later attempt may resolve.
const TRANSIENT_ERRORS: [u16; 6] = [403, 500, 503, 504, 412, NO_RESPONSE];

/// Every this many failed attempts on a transient error the pool is
/// reloaded from the store.
const RELOAD_INTERVAL: usize = 3;

/// Identifier of one request chain (the original call plus its retries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain-{}", self.0)
    }
}

/// Supplies refreshed cookies/credentials for the retried attempts of a
/// chain. Without one, retried attempts carry no cookies at all.
pub trait CredentialSource: Send + Sync {
    /// Credentials for the next attempt of `chain`, if any.
    fn refresh(&self, chain: ChainId) -> Option<Vec<(String, String)>>;
}

/// Classifies failures, bounds retries per chain and rotates proxies.
///
/// Each chain owns its own attempt counter; chains only share the pool.
pub struct RetryCoordinator {
    pool: Arc<ProxyPool>,
    max_attempts: usize,
    attempts: Mutex<HashMap<ChainId, usize>>,
    next_chain: AtomicU64,
    credentials: Option<Arc<dyn CredentialSource>>,
}

impl RetryCoordinator {
    /// Create a coordinator over the given pool.
    pub fn new(pool: Arc<ProxyPool>) -> Arc<Self> {
        Self::build(pool, None)
    }

    /// Create a coordinator that refreshes chain credentials from `source`
    /// before every retried attempt.
    pub fn with_credentials(pool: Arc<ProxyPool>, source: Arc<dyn CredentialSource>) -> Arc<Self> {
        Self::build(pool, Some(source))
    }

    fn build(pool: Arc<ProxyPool>, credentials: Option<Arc<dyn CredentialSource>>) -> Arc<Self> {
        let max_attempts = pool.config.max_attempts;
        info!("Initializing retry coordinator with max_attempts: {}", max_attempts);
        Arc::new(Self {
            pool,
            max_attempts,
            attempts: Mutex::new(HashMap::new()),
            next_chain: AtomicU64::new(0),
            credentials,
        })
    }

    /// The pool this coordinator rotates over.
    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// Start a new chain with a zeroed attempt counter.
    pub fn begin_chain(&self) -> ChainId {
        let id = ChainId(self.next_chain.fetch_add(1, Ordering::Relaxed));
        self.attempts.lock().insert(id, 0);
        id
    }

    /// Classify a failed attempt and decide whether the chain may retry.
    ///
    /// Terminal statuses reject immediately without touching the counter.
    /// Anything else counts as an attempt; the chain may go on while the
    /// counter stays below the maximum. Never errors: a missing response
    /// arrives here as the `NO_RESPONSE` sentinel.
    pub fn evaluate(&self, status: u16, chain: ChainId) -> bool {
        if status == NO_RESPONSE {
            warn!("No response received for {}", chain);
        } else {
            warn!("Response code {} for {}", status, chain);
        }

        // The resource itself is the problem, another proxy will not help.
        if TERMINAL_REJECT.contains(&status) {
            return false;
        }

        let count = {
            let mut attempts = self.attempts.lock();
            let entry = attempts.entry(chain).or_insert(0);
            *entry += 1;
            *entry
        };

        // Every third transient failure shakes the pool: a refresh may be
        // running in parallel and new proxies get picked up here. Purely a
        // side effect, the decision below stands either way.
        if TRANSIENT_ERRORS.contains(&status) && count % RELOAD_INTERVAL == 0 {
            info!("Attempt {} of {} hit a transient error, reloading the proxy pool", count, chain);
            self.pool.reload();
        }

        if count < self.max_attempts {
            true
        } else {
            warn!("Max attempts reached for {}", chain);
            false
        }
    }

    /// Reset the chain's attempt counter after a successful attempt.
    pub fn on_success(&self, chain: ChainId) {
        if let Some(count) = self.attempts.lock().remove(&chain) {
            if count > 0 {
                debug!("Resetting attempt counter for {} from {}", chain, count);
            }
        }
    }

    /// Demote the failed proxy and hand out the next one in rotation.
    pub async fn next_proxy(&self, failed: Option<&Proxy>, chain: ChainId) -> Result<Proxy, PoolExhausted> {
        if let Some(proxy) = failed {
            self.pool.update_rank(&proxy.host, proxy.port, -1);
        }
        let proxy = self.pool.select_next().await?;
        info!("Switching {} to proxy {}", chain, proxy.address());
        Ok(proxy)
    }

    /// Promote a proxy that served a successful attempt.
    pub fn on_success_proxy(&self, proxy: &Proxy) {
        self.pool.update_rank(&proxy.host, proxy.port, 1);
    }

    /// Cookies/credentials for the next attempt of `chain`. Retried
    /// attempts use these, never the caller-supplied originals.
    pub fn fresh_credentials(&self, chain: ChainId) -> Option<Vec<(String, String)>> {
        self.credentials.as_ref().and_then(|source| source.refresh(chain))
    }

    /// Discard the chain's retry state at a terminal outcome.
    pub fn finish(&self, chain: ChainId) {
        self.attempts.lock().remove(&chain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::utils;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn setup(dir: &TempDir) -> (Arc<ProxyPool>, Arc<RetryCoordinator>) {
        let config = PoolConfig::builder()
            .store_path(dir.path().join("proxies.csv"))
            .max_attempts(3)
            .reload_grace(Duration::from_millis(10))
            .build();
        let pool = ProxyPool::new(config);
        let coordinator = RetryCoordinator::new(pool.clone());
        (pool, coordinator)
    }

    fn proxy(host: &str, rank: i32) -> Proxy {
        Proxy::new(host, 8080, rank, 5.0)
    }

    #[test]
    fn terminal_statuses_reject_on_first_call() {
        let dir = tempdir().unwrap();
        let (_, coordinator) = setup(&dir);

        let chain = coordinator.begin_chain();
        assert!(!coordinator.evaluate(404, chain));
        assert!(!coordinator.evaluate(400, chain));

        // The counter was never touched, so a transient failure still
        // has the full attempt budget.
        assert!(coordinator.evaluate(500, chain));
        assert!(coordinator.evaluate(500, chain));
        assert!(!coordinator.evaluate(500, chain));
    }

    #[test]
    fn transient_failures_exhaust_at_max_attempts() {
        let dir = tempdir().unwrap();
        let (_, coordinator) = setup(&dir);

        let chain = coordinator.begin_chain();
        assert!(coordinator.evaluate(500, chain));
        assert!(coordinator.evaluate(500, chain));
        assert!(!coordinator.evaluate(500, chain));
        assert!(!coordinator.evaluate(500, chain));
    }

    #[test]
    fn pool_reload_fires_on_the_third_transient_attempt() {
        let dir = tempdir().unwrap();
        let (pool, coordinator) = setup(&dir);

        // The store gains proxies after the pool started empty, as if a
        // refresh ran in parallel. Only a reload can surface them.
        utils::write_store(&pool.config.store_path, &[proxy("a", 5), proxy("b", 5)]).unwrap();

        let chain = coordinator.begin_chain();
        coordinator.evaluate(500, chain);
        assert_eq!(pool.len(), 0);
        coordinator.evaluate(500, chain);
        assert_eq!(pool.len(), 0);
        coordinator.evaluate(500, chain);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn non_transient_statuses_never_trigger_a_reload() {
        let dir = tempdir().unwrap();
        let (pool, coordinator) = setup(&dir);
        utils::write_store(&pool.config.store_path, &[proxy("a", 5)]).unwrap();

        // 402 is neither terminal nor transient: it consumes attempts but
        // leaves the pool alone.
        let chain = coordinator.begin_chain();
        assert!(coordinator.evaluate(402, chain));
        assert!(coordinator.evaluate(402, chain));
        assert!(!coordinator.evaluate(402, chain));
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn success_resets_the_attempt_counter() {
        let dir = tempdir().unwrap();
        let (_, coordinator) = setup(&dir);

        let chain = coordinator.begin_chain();
        assert!(coordinator.evaluate(500, chain));
        assert!(coordinator.evaluate(500, chain));

        coordinator.on_success(chain);
        // Idempotent on a fresh counter.
        coordinator.on_success(chain);

        assert!(coordinator.evaluate(500, chain));
        assert!(coordinator.evaluate(500, chain));
        assert!(!coordinator.evaluate(500, chain));
    }

    #[test]
    fn chains_do_not_share_attempt_counters() {
        let dir = tempdir().unwrap();
        let (_, coordinator) = setup(&dir);

        let first = coordinator.begin_chain();
        let second = coordinator.begin_chain();
        assert!(coordinator.evaluate(500, first));
        assert!(coordinator.evaluate(500, first));

        assert!(coordinator.evaluate(500, second));
        assert!(coordinator.evaluate(500, second));
        assert!(!coordinator.evaluate(500, second));
    }

    #[tokio::test]
    async fn next_proxy_demotes_the_failed_one_and_rotates() {
        let dir = tempdir().unwrap();
        let (pool, coordinator) = setup(&dir);
        pool.load_from(vec![proxy("a", 5), proxy("b", 5)]);

        let chain = coordinator.begin_chain();
        let failed = proxy("a", 5);
        let replacement = coordinator.next_proxy(Some(&failed), chain).await.unwrap();

        assert_eq!(replacement.host, "b");
        let snapshot = pool.snapshot();
        assert_eq!(snapshot[0].host, "b");
        assert_eq!(snapshot[1].rank, 4);
    }

    #[test]
    fn success_promotes_the_proxy() {
        let dir = tempdir().unwrap();
        let (pool, coordinator) = setup(&dir);
        pool.load_from(vec![proxy("a", 5)]);

        coordinator.on_success_proxy(&proxy("a", 5));

        assert_eq!(pool.snapshot()[0].rank, 6);
    }

    struct FixedCredentials;

    impl CredentialSource for FixedCredentials {
        fn refresh(&self, _chain: ChainId) -> Option<Vec<(String, String)>> {
            Some(vec![("session".to_string(), "fresh".to_string())])
        }
    }

    #[test]
    fn credentials_come_from_the_injected_source() {
        let dir = tempdir().unwrap();
        let config = PoolConfig::builder()
            .store_path(dir.path().join("proxies.csv"))
            .build();
        let pool = ProxyPool::new(config);

        let plain = RetryCoordinator::new(pool.clone());
        let chain = plain.begin_chain();
        assert_eq!(plain.fresh_credentials(chain), None);

        let sourced = RetryCoordinator::with_credentials(pool, Arc::new(FixedCredentials));
        let chain = sourced.begin_chain();
        assert_eq!(
            sourced.fresh_credentials(chain),
            Some(vec![("session".to_string(), "fresh".to_string())])
        );
    }
}
