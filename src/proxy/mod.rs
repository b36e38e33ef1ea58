//! Proxy module for parsing, probing and harvesting proxies
//!
//! This module provides functionality for:
//! - The `ProxyRecord` stored in the pool and its `host:port` validation
//! - Probing proxy liveness through a routed HTTP request
//! - Harvesting candidate proxies from public lists

pub mod checker;
pub mod crawler;
pub mod models;
pub mod parser;

pub use checker::{CheckerConfig, Probe, ProxyChecker};
pub use crawler::{Collector, HttpCollector, ProxySource};
pub use models::{ProxyCheckResult, ProxyCheckStatus, ProxyRecord, ProxyType};
pub use parser::ProxyParser;
