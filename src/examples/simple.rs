//! Simple example of using reqwest-rotating-proxy.

use reqwest_rotating_proxy::{
    FetchOrchestrator, HttpMethod, PoolConfig, ProxyPool, RequestDescriptor, RequestEngine,
    RetryCoordinator,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Initializing proxy pool...");

    let config = PoolConfig::builder()
        // free proxy lists, plain `ip:port` lines
        .sources(vec![
            "https://api.proxyscrape.com/v2/?request=getproxies&protocol=http&timeout=500",
            "https://cdn.jsdelivr.net/gh/proxifly/free-proxy-list@main/proxies/protocols/http/data.txt",
        ])
        .store_path("data/proxies.csv")
        .pool_size(50)
        .max_attempts(3)
        .request_timeout(Duration::from_secs(5))
        // rate limit for each proxy, lower performance but avoids bans
        .max_requests_per_second(3.0)
        .build();

    let pool = ProxyPool::new(config);
    pool.replenish().await;
    println!("Pool holds {} proxies", pool.len());

    let coordinator = RetryCoordinator::new(pool.clone());
    let engine = Arc::new(RequestEngine::new(coordinator));
    let orchestrator = FetchOrchestrator::new(engine);

    println!("Sending requests...");
    let requests = vec![
        RequestDescriptor::new("https://httpbin.org/ip"),
        RequestDescriptor::new("https://httpbin.org/user-agent"),
    ];
    let results = orchestrator.fetch_all(requests, HttpMethod::Get).await?;

    for (index, outcome) in results.iter().enumerate() {
        match outcome.body() {
            Some(body) => println!("#{}: {}", index, body),
            None => println!("#{}: no result", index),
        }
    }

    Ok(())
}
