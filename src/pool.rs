//! Rank-ordered proxy pool with cyclic selection.

use crate::config::PoolConfig;
use crate::error::PoolExhausted;
use crate::proxy::Proxy;
use crate::utils;

use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time;

/// Upper bound on a proxy's rank. An increment that would cross it is
/// dropped so a long-lived proxy cannot build a score that takes ages
/// to drain before eviction.
pub(crate) const RANK_CEILING: i32 = 20;

/// Proxies above this rank survive a refill even when fresh candidates
/// are available.
pub(crate) const ESTABLISHED_RANK: i32 = 3;

struct PoolInner {
    /// Sorted by rank descending at all times, ties in insertion order.
    proxies: Vec<Proxy>,
    /// Round-robin cursor, reset to 0 after any structural mutation.
    cursor: usize,
}

/// A pool of proxies ordered by observed reliability.
pub struct ProxyPool {
    inner: Mutex<PoolInner>,
    /// Configuration for the pool.
    pub config: PoolConfig,
}

impl ProxyPool {
    /// Create a new pool and load its previous contents from the store.
    /// A missing store is not an error; the pool starts empty.
    pub fn new(config: PoolConfig) -> Arc<Self> {
        let pool = Arc::new(Self {
            inner: Mutex::new(PoolInner { proxies: Vec::new(), cursor: 0 }),
            config,
        });
        pool.reload();
        pool
    }

    /// Replace the pool contents with the given records.
    pub fn load_from(&self, mut records: Vec<Proxy>) {
        records.sort_by(|a, b| b.rank.cmp(&a.rank));
        let mut inner = self.inner.lock();
        inner.proxies = records;
        inner.cursor = 0;
    }

    /// Reload the pool from the CSV store. A missing store yields an
    /// empty pool, logged but never an error.
    pub fn reload(&self) {
        match utils::read_store(&self.config.store_path, self.config.max_requests_per_second) {
            Some(records) => {
                info!("Loaded {} proxies from {}", records.len(), self.config.store_path.display());
                self.load_from(records);
            }
            None => {
                warn!("Proxy store {} not found, starting with an empty pool", self.config.store_path.display());
                self.load_from(Vec::new());
            }
        }
    }

    /// Write the current pool contents to the CSV store, best-effort.
    pub fn persist(&self) {
        let inner = self.inner.lock();
        self.persist_locked(&inner.proxies);
    }

    fn persist_locked(&self, proxies: &[Proxy]) {
        match utils::write_store(&self.config.store_path, proxies) {
            Ok(()) => info!("Saved {} proxies to {}", proxies.len(), self.config.store_path.display()),
            Err(e) => error!("Failed to write proxy store {}: {}", self.config.store_path.display(), e),
        }
    }

    fn try_select(&self) -> Option<Proxy> {
        let mut inner = self.inner.lock();
        if inner.proxies.is_empty() {
            return None;
        }
        let idx = inner.cursor % inner.proxies.len();
        inner.cursor = idx + 1;
        Some(inner.proxies[idx].clone())
    }

    /// Return the next proxy in round-robin order.
    ///
    /// On an empty pool this waits for the configured grace interval,
    /// reloads from the store and retries the selection once; if the pool
    /// is still empty the caller gets `PoolExhausted`.
    pub async fn select_next(&self) -> Result<Proxy, PoolExhausted> {
        if let Some(proxy) = self.try_select() {
            return Ok(proxy);
        }

        warn!("Proxy pool is empty, reloading from {}", self.config.store_path.display());
        time::sleep(self.config.reload_grace).await;
        self.reload();

        self.try_select().ok_or(PoolExhausted)
    }

    /// Adjust the rank of the proxy at `host:port` by `delta`.
    ///
    /// An unknown address is a logged no-op. A rank driven below 0 evicts
    /// the proxy; otherwise the proxy bubbles to its new position by local
    /// swaps, which is O(distance moved) for the small deltas seen here.
    pub fn update_rank(&self, host: &str, port: u16, delta: i32) {
        let mut inner = self.inner.lock();

        let Some(mut idx) = inner.proxies.iter().position(|p| p.host == host && p.port == port) else {
            warn!("Proxy {}:{} not found in the pool", host, port);
            return;
        };

        let rank = inner.proxies[idx].rank;
        let new_rank = if rank + delta <= RANK_CEILING { rank + delta } else { rank };
        info!("Updating rank for {}:{} from {} to {}", host, port, rank, new_rank);
        inner.proxies[idx].rank = new_rank;

        if new_rank < 0 {
            inner.proxies.remove(idx);
        } else {
            while idx > 0 && inner.proxies[idx].rank > inner.proxies[idx - 1].rank {
                inner.proxies.swap(idx, idx - 1);
                idx -= 1;
            }
            while idx + 1 < inner.proxies.len() && inner.proxies[idx].rank < inner.proxies[idx + 1].rank {
                inner.proxies.swap(idx, idx + 1);
                idx += 1;
            }
        }

        inner.cursor = 0;
        self.persist_locked(&inner.proxies);
    }

    /// Top the pool up to `target_size` from the given candidates.
    ///
    /// Established proxies (rank above the keep threshold) are retained;
    /// candidates are taken in their given order up to the deficit, minus
    /// any whose address is already present.
    pub fn refill(&self, candidates: Vec<Proxy>, target_size: usize) {
        let mut inner = self.inner.lock();

        inner.proxies.retain(|p| p.rank > ESTABLISHED_RANK);

        if inner.proxies.len() < target_size {
            let deficit = target_size - inner.proxies.len();
            info!("Need {} proxies to reach {}", deficit, target_size);

            let fresh: Vec<Proxy> = candidates
                .into_iter()
                .take(deficit)
                .filter(|c| !inner.proxies.iter().any(|p| p == c))
                .collect();

            info!("Updated proxy list with {} new proxies", fresh.len());
            inner.proxies.extend(fresh);
            inner.proxies.sort_by(|a, b| b.rank.cmp(&a.rank));
            inner.proxies.truncate(target_size);
        }

        inner.cursor = 0;
        self.persist_locked(&inner.proxies);
    }

    /// Reload the store, pull candidates from every configured source and
    /// refill up to the configured pool size. Source failures count as
    /// zero candidates.
    pub async fn replenish(&self) {
        self.reload();

        let mut candidates = Vec::new();
        for source in &self.config.sources {
            match utils::fetch_candidates_from_source(source, self.config.max_requests_per_second).await {
                Ok(batch) => {
                    info!("Fetched {} candidate proxies from {}", batch.len(), source);
                    candidates.extend(batch);
                }
                Err(e) => {
                    warn!("Failed to fetch candidates from {}: {}", source, e);
                }
            }
        }

        self.refill(candidates, self.config.pool_size);
    }

    /// Empty the pool and the backing store.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.proxies.clear();
        inner.cursor = 0;
        self.persist_locked(&inner.proxies);
    }

    /// Number of proxies currently in the pool.
    pub fn len(&self) -> usize {
        self.inner.lock().proxies.len()
    }

    /// Whether the pool is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A cloned view of the pool contents, highest rank first.
    pub fn snapshot(&self) -> Vec<Proxy> {
        self.inner.lock().proxies.clone()
    }
}
