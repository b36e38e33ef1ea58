//! Proxy crawler module for harvesting candidates from public lists
//!
//! This module provides:
//! - The `Collector` contract the scheduler drives on every collection round
//! - `HttpCollector`, which fetches plain-text or HTML proxy lists
//! - Text extraction with a regex fallback for `IP:PORT` embedded in markup

use crate::proxy::models::{ProxyRecord, ProxyType};
use crate::proxy::parser::ProxyParser;
use crate::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Regex pattern to match IP:PORT patterns in text
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})\b")
        .expect("Invalid IP:PORT regex")
});

/// Anything that yields candidate proxies
///
/// Collectors may run concurrently with each other; a failed collector only
/// loses its own round.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    async fn collect(&self) -> Result<Vec<ProxyRecord>>;
}

/// Website that publishes a proxy list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProxySource {
    /// Name of the proxy source
    pub name: String,
    /// URL to fetch proxies from
    pub url: String,
    /// Proxy type for this source
    #[serde(default)]
    pub proxy_type: ProxyType,
}

impl ProxySource {
    pub fn new(name: &str, url: &str, proxy_type: ProxyType) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            proxy_type,
        }
    }

    /// A handful of well-known free proxy lists
    pub fn common_sources() -> Vec<ProxySource> {
        vec![
            ProxySource::new(
                "free-proxy-list.net",
                "https://free-proxy-list.net/",
                ProxyType::Http,
            ),
            ProxySource::new(
                "sslproxies",
                "https://www.sslproxies.org/",
                ProxyType::Https,
            ),
            ProxySource::new("us-proxy.org", "https://www.us-proxy.org/", ProxyType::Http),
        ]
    }
}

/// Collector fetching a single proxy list over HTTP
pub struct HttpCollector {
    source: ProxySource,
    client: Client,
}

impl HttpCollector {
    /// Create a collector with the default timeout and user agent
    pub fn new(source: ProxySource) -> Result<Self> {
        Self::with_timeout(source, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(source: ProxySource, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;

        Ok(Self { source, client })
    }

    pub fn source(&self) -> &ProxySource {
        &self.source
    }

    /// Parse candidates from raw page content
    ///
    /// Line-by-line parsing is tried first; when nothing parses the content
    /// is scanned for embedded `IP:PORT` pairs. Duplicates are dropped.
    pub fn parse_text(content: &str, proxy_type: ProxyType) -> Vec<ProxyRecord> {
        let mut records = ProxyParser::parse_string(content, proxy_type);

        if records.is_empty() {
            records = Self::extract_with_regex(content, proxy_type);
        }

        let mut seen = HashSet::new();
        records.retain(|r| seen.insert(r.address.clone()));
        records
    }

    fn extract_with_regex(content: &str, proxy_type: ProxyType) -> Vec<ProxyRecord> {
        IP_PORT_REGEX
            .captures_iter(content)
            .filter_map(|cap| {
                let host = cap.get(1)?.as_str();
                let port = cap.get(2)?.as_str();

                let valid_octets = host
                    .split('.')
                    .all(|part| part.parse::<u32>().is_ok_and(|n| n <= 255));
                if !valid_octets {
                    return None;
                }

                ProxyRecord::new(format!("{}:{}", host, port), proxy_type.to_string()).ok()
            })
            .collect()
    }
}

#[async_trait]
impl Collector for HttpCollector {
    fn name(&self) -> &str {
        &self.source.name
    }

    async fn collect(&self) -> Result<Vec<ProxyRecord>> {
        let response = self
            .client
            .get(&self.source.url)
            .send()
            .await?
            .error_for_status()?;
        let content = response.text().await?;
        Ok(Self::parse_text(&content, self.source.proxy_type))
    }
}
