//! Concurrent fan-out of independent requests.

use crate::engine::{FetchOutcome, RequestDescriptor, RequestEngine};
use crate::error::PoolExhausted;

use futures::future;
use log::warn;
use std::sync::Arc;

/// HTTP methods the orchestrator recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

/// Fans a batch of independent requests out to the engine concurrently.
pub struct FetchOrchestrator {
    engine: Arc<RequestEngine>,
}

impl FetchOrchestrator {
    /// Create an orchestrator over the given engine.
    pub fn new(engine: Arc<RequestEngine>) -> Self {
        Self { engine }
    }

    /// The engine used for direct, single-request callers.
    pub fn engine(&self) -> &Arc<RequestEngine> {
        &self.engine
    }

    /// Issue every request concurrently and collect the outcomes in the
    /// order the requests were given, regardless of completion order.
    ///
    /// A chain that ends rejected or exhausted shows up as its `NoResult`
    /// entry without disturbing its siblings; only an exhausted pool makes
    /// the whole call fail, and even then every in-flight chain runs to
    /// its own terminal state first. PUT and DELETE are recognized but
    /// dispatch no work yet.
    pub async fn fetch_all(
        &self,
        requests: Vec<RequestDescriptor>,
        method: HttpMethod,
    ) -> Result<Vec<FetchOutcome>, PoolExhausted> {
        match method {
            HttpMethod::Get => {
                let calls: Vec<_> = requests.into_iter().map(|request| self.engine.get(request)).collect();
                future::join_all(calls).await.into_iter().collect()
            }
            HttpMethod::Post => {
                let calls: Vec<_> = requests.into_iter().map(|request| self.engine.post(request)).collect();
                future::join_all(calls).await.into_iter().collect()
            }
            HttpMethod::Put | HttpMethod::Delete => {
                warn!("{:?} method is not implemented yet", method);
                Ok(Vec::new())
            }
        }
    }
}
