//! Single-request execution with proxy rotation on failure.

use crate::error::PoolExhausted;
use crate::proxy::Proxy;
use crate::retry::{ChainId, RetryCoordinator, NO_RESPONSE};

use log::{error, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, COOKIE, USER_AGENT};
use std::sync::Arc;
use std::time::Duration;

const SUCCESS_STATUSES: [u16; 2] = [200, 201];

/// Terminal result of one request chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The response body of a successful attempt.
    Fetched(String),
    /// The chain ended without a usable response; `last_status` is the
    /// status of the final attempt (0 when there was no response at all).
    NoResult { last_status: u16 },
}

impl FetchOutcome {
    /// The fetched body, if the chain succeeded.
    pub fn body(&self) -> Option<&str> {
        match self {
            FetchOutcome::Fetched(body) => Some(body),
            FetchOutcome::NoResult { .. } => None,
        }
    }

    /// Consume the outcome into an optional body.
    pub fn into_body(self) -> Option<String> {
        match self {
            FetchOutcome::Fetched(body) => Some(body),
            FetchOutcome::NoResult { .. } => None,
        }
    }
}

/// One request to be issued, with optional per-request overrides.
///
/// GET requests carry `cookies`; POST requests carry `body`. A descriptor
/// without a proxy is issued directly, and only failures pull the chain
/// onto the pool's rotation.
#[derive(Debug, Clone, Default)]
pub struct RequestDescriptor {
    pub url: String,
    pub headers: Option<HeaderMap>,
    pub cookies: Option<Vec<(String, String)>>,
    pub body: Option<String>,
    pub proxy: Option<Proxy>,
    /// Caller-side identifier used in log lines.
    pub id: Option<String>,
}

impl RequestDescriptor {
    /// A descriptor for `url` with everything else defaulted.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Verb {
    Get,
    Post,
}

/// Issues HTTP calls through a supplied proxy and drives the retry loop
/// for one chain until success, rejection or exhaustion.
pub struct RequestEngine {
    coordinator: Arc<RetryCoordinator>,
    default_headers: HeaderMap,
    timeout: Duration,
}

impl RequestEngine {
    /// Create an engine over the given coordinator; the per-attempt
    /// timeout comes from the pool configuration.
    pub fn new(coordinator: Arc<RetryCoordinator>) -> Self {
        let timeout = coordinator.pool().config.request_timeout;
        Self {
            coordinator,
            default_headers: default_headers(),
            timeout,
        }
    }

    /// Issue a GET request, rotating proxies on retryable failures.
    pub async fn get(&self, request: RequestDescriptor) -> Result<FetchOutcome, PoolExhausted> {
        self.run(Verb::Get, request).await
    }

    /// Issue a POST request, rotating proxies on retryable failures.
    pub async fn post(&self, request: RequestDescriptor) -> Result<FetchOutcome, PoolExhausted> {
        self.run(Verb::Post, request).await
    }

    async fn run(&self, verb: Verb, request: RequestDescriptor) -> Result<FetchOutcome, PoolExhausted> {
        let chain = self.coordinator.begin_chain();
        let label = request.id.clone().unwrap_or_else(|| chain.to_string());
        let headers = request.headers.clone().unwrap_or_else(|| self.default_headers.clone());
        let mut proxy = request.proxy;
        let mut cookies = request.cookies;

        // Bounded loop rather than re-entrant calls: the coordinator's
        // attempt counter is the only thing that ends an unlucky chain.
        loop {
            if let Some(p) = &proxy {
                p.limiter.until_ready().await;
            }

            let attempt = self
                .attempt(verb, &request.url, &headers, cookies.as_deref(), request.body.as_deref(), proxy.as_ref())
                .await;

            match attempt {
                Ok(body) => {
                    info!("Successfully made request for URL: {} ({})", request.url, label);
                    if let Some(p) = &proxy {
                        self.coordinator.on_success_proxy(p);
                    }
                    self.coordinator.on_success(chain);
                    return Ok(FetchOutcome::Fetched(body));
                }
                Err(status) => {
                    error!("Request failed for URL: {} ({}). Going to evaluate.", request.url, label);

                    if self.coordinator.evaluate(status, chain) {
                        warn!("Retrying request for URL: {} ({})", request.url, label);
                        match self.coordinator.next_proxy(proxy.as_ref(), chain).await {
                            Ok(replacement) => {
                                proxy = Some(replacement);
                                cookies = self.coordinator.fresh_credentials(chain);
                            }
                            Err(e) => {
                                self.coordinator.finish(chain);
                                return Err(e);
                            }
                        }
                    } else {
                        error!(
                            "Request failed for URL: {} ({}), status code: {}, returning no result",
                            request.url, label, status
                        );
                        self.coordinator.finish(chain);
                        return Ok(FetchOutcome::NoResult { last_status: status });
                    }
                }
            }
        }
    }

    /// One attempt: build a client for the proxy, send, classify. The
    /// error side is the failure status, with 0 standing in for anything
    /// that produced no response.
    async fn attempt(
        &self,
        verb: Verb,
        url: &str,
        headers: &HeaderMap,
        cookies: Option<&[(String, String)]>,
        body: Option<&str>,
        proxy: Option<&Proxy>,
    ) -> Result<String, u16> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout);

        if let Some(p) = proxy {
            match p.to_reqwest_proxy() {
                Ok(reqwest_proxy) => builder = builder.proxy(reqwest_proxy),
                Err(e) => {
                    warn!("Failed to create proxy from {}: {}", p.address(), e);
                    return Err(NO_RESPONSE);
                }
            }
        }

        let client = match builder.build() {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to build client: {}", e);
                return Err(NO_RESPONSE);
            }
        };

        let mut pending = match verb {
            Verb::Get => client.get(url),
            Verb::Post => client.post(url).body(body.unwrap_or_default().to_string()),
        };
        pending = pending.headers(headers.clone());
        if let Some(value) = cookies.and_then(cookie_header) {
            pending = pending.header(COOKIE, value);
        }

        match pending.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if SUCCESS_STATUSES.contains(&status) {
                    response.text().await.map_err(|_| NO_RESPONSE)
                } else {
                    Err(status)
                }
            }
            Err(e) => {
                warn!("Transport failure for {}: {}", url, e);
                Err(NO_RESPONSE)
            }
        }
    }
}

fn cookie_header(cookies: &[(String, String)]) -> Option<HeaderValue> {
    if cookies.is_empty() {
        return None;
    }
    let joined = cookies
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ");
    HeaderValue::from_str(&joined).ok()
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/106.0.0.0 Safari/537.36",
        ),
    );
    headers
}
