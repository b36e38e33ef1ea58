//! Proxy parser module for turning raw text into candidate records

use crate::proxy::models::{ProxyRecord, ProxyType};
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::warn;

/// `scheme://host:port` with an optional trailing slash
static URL_LINE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)(https?|socks[45])://([^/\s@]+)/?$").expect("Invalid proxy URL regex")
});

/// Proxy parser for parsing candidates from strings and files
pub struct ProxyParser;

impl ProxyParser {
    /// Split and validate a `host:port` address
    ///
    /// The host must be non-empty and free of whitespace, IPv6 hosts must be
    /// bracketed, and the port must be in `1..=65535`.
    pub fn parse_address(address: &str) -> Option<(String, u16)> {
        let address = address.trim();
        let (host, port) = address.rsplit_once(':')?;

        if host.is_empty()
            || host.chars().any(|c| c.is_whitespace() || matches!(c, '/' | '@'))
        {
            return None;
        }
        if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
            return None;
        }

        let port: u16 = port.parse().ok()?;
        if port == 0 {
            return None;
        }

        Some((host.to_string(), port))
    }

    /// Parse a single candidate line
    ///
    /// Supports formats:
    /// - IP:PORT
    /// - scheme://IP:PORT (the scheme becomes the record's kind)
    pub fn parse_line(line: &str, default_type: ProxyType) -> Option<ProxyRecord> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        if let Some(caps) = URL_LINE_REGEX.captures(line) {
            let proxy_type: ProxyType = match caps[1].parse() {
                Ok(proxy_type) => proxy_type,
                Err(e) => {
                    warn!(line, error = %e, "Skipping proxy");
                    return None;
                }
            };
            return ProxyRecord::new(&caps[2], proxy_type.to_string()).ok();
        }

        ProxyRecord::new(line, default_type.to_string()).ok()
    }

    /// Parse candidates from a string (multiple lines)
    pub fn parse_string(content: &str, default_type: ProxyType) -> Vec<ProxyRecord> {
        content
            .lines()
            .filter_map(|line| Self::parse_line(line, default_type))
            .collect()
    }

    /// Parse candidates from a file
    pub fn parse_file<P: AsRef<Path>>(path: P, default_type: ProxyType) -> Result<Vec<ProxyRecord>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_string(&content, default_type))
    }

    /// Save records to a file, one `scheme://host:port` per line when tagged
    pub fn save_to_file<P: AsRef<Path>>(records: &[ProxyRecord], path: P) -> Result<()> {
        let content: String = records
            .iter()
            .map(|r| {
                if r.kind.is_empty() {
                    r.address.clone()
                } else {
                    format!("{}://{}", r.kind, r.address)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        fs::write(path, content)?;
        Ok(())
    }
}
