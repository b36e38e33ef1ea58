//! Proxy data models

use crate::error::PoolError;
use crate::proxy::parser::ProxyParser;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Proxy protocol, used as the `kind` tag of a record
///
/// SOCKS4 is not supported: the HTTP client cannot route through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks5,
}

impl ProxyType {
    /// Scheme used when routing a request through a proxy of this type
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyType::Http | ProxyType::Https => "http",
            ProxyType::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyType::Http => write!(f, "http"),
            ProxyType::Https => write!(f, "https"),
            ProxyType::Socks5 => write!(f, "socks5"),
        }
    }
}

impl FromStr for ProxyType {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks5" => Ok(ProxyType::Socks5),
            other => Err(PoolError::UnsupportedProxyType(other.to_string())),
        }
    }
}

/// A single proxy in the pool, keyed by its `host:port` address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub address: String,
    #[serde(default)]
    pub kind: String,
    /// When a probe last confirmed this proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
}

impl ProxyRecord {
    /// Create a record, rejecting anything that is not a `host:port` pair
    /// and SOCKS4 kinds
    pub fn new(address: impl Into<String>, kind: impl Into<String>) -> Result<Self, PoolError> {
        let address = address.into();
        let kind = kind.into();
        if kind.trim().eq_ignore_ascii_case("socks4") {
            return Err(PoolError::UnsupportedProxyType(kind));
        }
        let (host, port) = ProxyParser::parse_address(&address)
            .ok_or_else(|| PoolError::InvalidAddress(address.clone()))?;

        Ok(Self {
            address: format!("{}:{}", host, port),
            kind,
            checked_at: None,
        })
    }

    /// Create an untagged candidate
    pub fn candidate(address: impl Into<String>) -> Result<Self, PoolError> {
        Self::new(address, String::new())
    }

    /// Stamp the record as verified now
    pub fn mark_checked(mut self) -> Self {
        self.checked_at = Some(Utc::now());
        self
    }

    /// Protocol implied by the kind tag; anything unrecognised is treated as HTTP
    pub fn proxy_type(&self) -> ProxyType {
        self.kind.parse().unwrap_or_default()
    }

    /// URL used to route traffic through this proxy
    pub fn url(&self) -> String {
        format!("{}://{}", self.proxy_type().scheme(), self.address)
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.address, self.kind)
        }
    }
}

/// Result of proxy check operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyCheckStatus {
    Working,
    Failed(String),
    Timeout,
}

/// Detailed result of a proxy check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyCheckResult {
    pub proxy: ProxyRecord,
    pub status: ProxyCheckStatus,
    pub response_time_ms: Option<u64>,
}

impl ProxyCheckResult {
    pub fn working(proxy: ProxyRecord, response_time_ms: u64) -> Self {
        Self {
            proxy,
            status: ProxyCheckStatus::Working,
            response_time_ms: Some(response_time_ms),
        }
    }

    pub fn failed(proxy: ProxyRecord, error: String) -> Self {
        Self {
            proxy,
            status: ProxyCheckStatus::Failed(error),
            response_time_ms: None,
        }
    }

    pub fn timeout(proxy: ProxyRecord) -> Self {
        Self {
            proxy,
            status: ProxyCheckStatus::Timeout,
            response_time_ms: None,
        }
    }

    pub fn is_working(&self) -> bool {
        matches!(self.status, ProxyCheckStatus::Working)
    }
}
