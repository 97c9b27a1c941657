//! # reqwest-rotating-proxy
//!
//! A rank-ordered rotating proxy pool for reqwest.
//!
//! The pool keeps proxies sorted by an observed-reliability rank and hands
//! them out in round-robin order. Failed requests are classified, demote
//! the proxy they went through and are retried through the next proxy in
//! rotation under a bounded attempt budget; batches of independent
//! requests fan out concurrently with their result order preserved.

pub mod config;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod orchestrator;
pub mod pool;
pub mod proxy;
pub mod retry;
mod utils;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use engine::{FetchOutcome, RequestDescriptor, RequestEngine};
pub use error::PoolExhausted;
pub use middleware::ProxyPoolMiddleware;
pub use orchestrator::{FetchOrchestrator, HttpMethod};
pub use pool::ProxyPool;
pub use proxy::Proxy;
pub use retry::{ChainId, CredentialSource, RetryCoordinator};
