//! Middleware implementation for reqwest.

use crate::proxy::Proxy;
use crate::retry::{ChainId, RetryCoordinator, NO_RESPONSE};

use anyhow::anyhow;
use async_trait::async_trait;
use log::{info, warn};
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::sync::Arc;

/// Middleware that routes requests through the ranked proxy pool.
///
/// Unlike the engine, this operates on arbitrary `reqwest::Request`s and
/// surfaces the terminal response itself: a terminally-rejected status
/// comes back as that response, so callers see what the server said.
#[derive(Clone)]
pub struct ProxyPoolMiddleware {
    coordinator: Arc<RetryCoordinator>,
}

impl ProxyPoolMiddleware {
    /// Create a middleware over the given coordinator.
    pub fn new(coordinator: Arc<RetryCoordinator>) -> Self {
        Self { coordinator }
    }

    async fn rotate(&self, failed: &Proxy, chain: ChainId) -> Result<Proxy> {
        self.coordinator.next_proxy(Some(failed), chain).await.map_err(|e| {
            self.coordinator.finish(chain);
            Error::Middleware(anyhow!(e))
        })
    }
}

#[async_trait]
impl Middleware for ProxyPoolMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        _extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let pool = self.coordinator.pool();
        let chain = self.coordinator.begin_chain();

        let mut proxy = match pool.select_next().await {
            Ok(proxy) => proxy,
            Err(e) => return Err(Error::Middleware(anyhow!(e))),
        };

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let proxied_request = req.try_clone().ok_or_else(|| {
                Error::Middleware(anyhow!(
                    "Request object is not cloneable. Are you passing a streaming body?".to_string()
                ))
            })?;

            info!("Using proxy: {} (attempt {})", proxy.address(), attempt);
            proxy.limiter.until_ready().await;

            let outcome = match proxy.to_reqwest_proxy() {
                Ok(reqwest_proxy) => {
                    match reqwest::Client::builder()
                        .proxy(reqwest_proxy)
                        .timeout(pool.config.request_timeout)
                        .build()
                    {
                        Ok(client) => Some(client.execute(proxied_request).await),
                        Err(e) => {
                            warn!("Failed to build client with proxy {}: {}", proxy.address(), e);
                            None
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to create proxy from {}: {}", proxy.address(), e);
                    None
                }
            };

            match outcome {
                Some(Ok(response)) => {
                    let status = response.status().as_u16();
                    if matches!(status, 200 | 201) {
                        self.coordinator.on_success_proxy(&proxy);
                        self.coordinator.on_success(chain);
                        return Ok(response);
                    }
                    if self.coordinator.evaluate(status, chain) {
                        proxy = self.rotate(&proxy, chain).await?;
                        continue;
                    }
                    // Terminal: hand the last response back so the caller
                    // sees the status the server answered with.
                    self.coordinator.finish(chain);
                    return Ok(response);
                }
                Some(Err(err)) => {
                    warn!("Request failed with proxy {} (attempt {}): {}", proxy.address(), attempt, err);
                    if self.coordinator.evaluate(NO_RESPONSE, chain) {
                        proxy = self.rotate(&proxy, chain).await?;
                        continue;
                    }
                    self.coordinator.finish(chain);
                    return Err(Error::Reqwest(err));
                }
                None => {
                    if self.coordinator.evaluate(NO_RESPONSE, chain) {
                        proxy = self.rotate(&proxy, chain).await?;
                        continue;
                    }
                    self.coordinator.finish(chain);
                    return Err(Error::Middleware(anyhow!(
                        "No usable client for proxy {}",
                        proxy.address()
                    )));
                }
            }
        }
    }
}
