//! Candidate acquisition and the CSV store backing the pool.

use crate::proxy::Proxy;

use log::warn;
use reqwest::Client;
use std::fs;
use std::io;
use std::path::Path;
use url::Url;

/// Rank assigned to candidates freshly taken from a listing source.
pub(crate) const INITIAL_RANK: i32 = 5;

const STORE_HEADER: &str = "ip,port,country,https,rank";

/// Fetch and parse a list of candidate proxies from a URL or file path.
/// An unreadable file yields zero candidates, not an error.
pub(crate) async fn fetch_candidates_from_source(source: &str, max_rps: f64) -> Result<Vec<Proxy>, reqwest::Error> {
    if source.starts_with("http") {
        // Fetch from URL
        let client = Client::new();
        let response = client.get(source).send().await?;
        let content = response.text().await?;
        Ok(parse_candidate_list(&content, max_rps))
    } else {
        // Read from file
        match fs::read_to_string(source) {
            Ok(content) => Ok(parse_candidate_list(&content, max_rps)),
            Err(_) => Ok(Vec::new()),
        }
    }
}

/// Parse the text content of a proxy listing into candidates.
///
/// Accepts bare `host:port` lines and `scheme://host:port` lines; an https
/// scheme marks the candidate as HTTPS-capable. Comments and lines that do
/// not carry a usable address are skipped.
pub(crate) fn parse_candidate_list(content: &str, max_rps: f64) -> Vec<Proxy> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            if line.contains("://") {
                let parsed = Url::parse(line).ok()?;
                let host = parsed.host_str()?.to_string();
                // port() elides a scheme's default port, e.g. https://x:443.
                let port = parsed.port_or_known_default()?;
                let mut proxy = Proxy::new(host, port, INITIAL_RANK, max_rps);
                proxy.https = parsed.scheme() == "https";
                Some(proxy)
            } else {
                let (host, port) = line.rsplit_once(':')?;
                let port = port.parse().ok()?;
                Some(Proxy::new(host, port, INITIAL_RANK, max_rps))
            }
        })
        .collect()
}

/// Read the CSV store. Returns `None` when the store does not exist yet.
pub(crate) fn read_store(path: &Path, max_rps: f64) -> Option<Vec<Proxy>> {
    let content = fs::read_to_string(path).ok()?;
    let mut proxies = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line == STORE_HEADER {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 5 {
            warn!("Skipping malformed proxy row: {}", line);
            continue;
        }
        let Ok(port) = fields[1].parse::<u16>() else {
            warn!("Skipping proxy row with unusable port: {}", line);
            continue;
        };
        // A missing or garbled rank falls back to 0 rather than dropping the row.
        let mut proxy = Proxy::new(fields[0], port, fields[4].parse().unwrap_or(0), max_rps);
        proxy.country = if fields[2].is_empty() { None } else { Some(fields[2].to_string()) };
        proxy.https = fields[3] == "yes";
        proxies.push(proxy);
    }

    Some(proxies)
}

/// Write the pool contents to the CSV store.
pub(crate) fn write_store(path: &Path, proxies: &[Proxy]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut out = String::from(STORE_HEADER);
    out.push('\n');
    for proxy in proxies {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            proxy.host,
            proxy.port,
            proxy.country.as_deref().unwrap_or(""),
            if proxy.https { "yes" } else { "no" },
            proxy.rank
        ));
    }
    fs::write(path, out)
}
