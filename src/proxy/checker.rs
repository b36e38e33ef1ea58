//! Proxy checker module for probing proxy liveness

use crate::proxy::models::{ProxyCheckResult, ProxyRecord};
use crate::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Proxy as ReqwestProxy, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default timeout for proxy checks in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of concurrent checks for batch checking
const DEFAULT_CONCURRENCY: usize = 10;

/// Default URL to probe proxies against
const DEFAULT_TEST_URL: &str = "http://httpbin.org/get";

/// Liveness check for a single proxy
///
/// Network-level failures are reported as `false`, never as errors.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, proxy: &ProxyRecord) -> bool;
}

/// Configuration for proxy checker
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    /// Timeout for each proxy check, in seconds
    pub timeout_secs: u64,
    /// Number of concurrent checks for batch checking
    pub concurrency: usize,
    /// URL to test proxies against
    pub test_url: String,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            concurrency: DEFAULT_CONCURRENCY,
            test_url: DEFAULT_TEST_URL.to_string(),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Probes proxies by routing a GET to the test URL through them
#[derive(Debug, Clone, Default)]
pub struct ProxyChecker {
    config: CheckerConfig,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Check a single proxy, reporting why it failed
    ///
    /// Only a `200 OK` counts as working.
    pub async fn check_proxy(&self, proxy: &ProxyRecord) -> ProxyCheckResult {
        let start = Instant::now();

        let client = match self.create_client(proxy) {
            Ok(client) => client,
            Err(e) => return ProxyCheckResult::failed(proxy.clone(), e.to_string()),
        };

        match tokio::time::timeout(
            self.config.timeout(),
            client.get(&self.config.test_url).send(),
        )
        .await
        {
            Ok(Ok(response)) if response.status() == StatusCode::OK => {
                let elapsed = start.elapsed().as_millis() as u64;
                ProxyCheckResult::working(proxy.clone(), elapsed)
            }
            Ok(Ok(response)) => ProxyCheckResult::failed(
                proxy.clone(),
                format!("HTTP status: {}", response.status()),
            ),
            Ok(Err(e)) if e.is_timeout() => ProxyCheckResult::timeout(proxy.clone()),
            Ok(Err(e)) => ProxyCheckResult::failed(proxy.clone(), e.to_string()),
            Err(_) => ProxyCheckResult::timeout(proxy.clone()),
        }
    }

    /// Check multiple proxies concurrently
    pub async fn check_proxies(&self, proxies: Vec<ProxyRecord>) -> Vec<ProxyCheckResult> {
        stream::iter(proxies)
            .map(|proxy| async move { self.check_proxy(&proxy).await })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await
    }

    /// Check proxies and separate into good and bad results
    pub async fn check_and_separate(
        &self,
        proxies: Vec<ProxyRecord>,
    ) -> (Vec<ProxyCheckResult>, Vec<ProxyCheckResult>) {
        self.check_proxies(proxies)
            .await
            .into_iter()
            .partition(|r| r.is_working())
    }

    /// Create a reqwest client routed through the proxy
    fn create_client(&self, proxy: &ProxyRecord) -> Result<Client> {
        let client = Client::builder()
            .proxy(ReqwestProxy::all(proxy.url())?)
            .timeout(self.config.timeout())
            .build()?;

        Ok(client)
    }
}

#[async_trait]
impl Probe for ProxyChecker {
    async fn probe(&self, proxy: &ProxyRecord) -> bool {
        let result = self.check_proxy(proxy).await;
        if !result.is_working() {
            debug!(proxy = %proxy.address, status = ?result.status, "Probe failed");
        }
        result.is_working()
    }
}
