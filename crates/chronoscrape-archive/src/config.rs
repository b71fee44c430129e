//! Enumerated configuration records for archive routing.
//!
//! Unknown keys are rejected at deserialization time; there is no dynamic
//! config dictionary anywhere in the pipeline.

use serde::{Deserialize, Serialize};

/// Strategy for handling fallback between archive sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Move to the next source on the first error.
    Immediate,
    /// Stay on the source while the error is retriable and its breaker is
    /// closed; otherwise fall back.
    RetryThenFallback,
    /// Fall back only when the strategy's breaker is open.
    CircuitBreaker,
}

impl Default for FallbackStrategy {
    fn default() -> Self {
        FallbackStrategy::CircuitBreaker
    }
}

/// Per-source configuration, shared by every strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ArchiveSourceConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub page_size: u32,
    pub max_pages: Option<u32>,
    pub include_attachments: bool,
    /// Lower number wins in hybrid ordering.
    pub priority: u32,
}

impl Default for ArchiveSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 120,
            max_retries: 3,
            page_size: 5000,
            max_pages: None,
            include_attachments: true,
            priority: 1,
        }
    }
}

/// Residential proxy credentials for the Smartproxy Common Crawl strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmartproxyConfig {
    /// `host:port` of the proxy endpoint.
    pub endpoint: String,
    pub username: String,
    pub password: String,
    /// Append a random session token to the username so the provider pins
    /// one exit IP per query.
    pub session_stickiness: bool,
}

/// One endpoint of the generic rotating proxy pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyEndpoint {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Routing behavior across sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RoutingConfig {
    pub fallback_strategy: FallbackStrategy,
    pub fallback_delay_secs: f64,
    pub exponential_backoff: bool,
    pub max_fallback_delay: f64,
    pub max_fallback_attempts: usize,
    /// Hard cap per strategy attempt so internal retries never block the
    /// fallback chain.
    pub per_strategy_timeout_secs: f64,

    pub wayback: ArchiveSourceConfig,
    pub common_crawl: ArchiveSourceConfig,

    pub enable_smartproxy_fallback: bool,
    pub enable_proxy_fallback: bool,
    pub enable_direct_fallback: bool,
    pub enable_ia_fallback: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            fallback_strategy: FallbackStrategy::default(),
            fallback_delay_secs: 1.0,
            exponential_backoff: true,
            max_fallback_delay: 30.0,
            max_fallback_attempts: 5,
            per_strategy_timeout_secs: 75.0,
            wayback: ArchiveSourceConfig {
                priority: 1,
                ..ArchiveSourceConfig::default()
            },
            common_crawl: ArchiveSourceConfig {
                priority: 2,
                timeout_secs: 180,
                ..ArchiveSourceConfig::default()
            },
            enable_smartproxy_fallback: true,
            enable_proxy_fallback: false,
            enable_direct_fallback: true,
            enable_ia_fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let config = RoutingConfig::default();
        assert_eq!(config.fallback_strategy, FallbackStrategy::CircuitBreaker);
        assert_eq!(config.max_fallback_attempts, 5);
        assert!((config.per_strategy_timeout_secs - 75.0).abs() < f64::EPSILON);
        assert!(config.wayback.priority < config.common_crawl.priority);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = serde_json::from_str::<RoutingConfig>(r#"{"fallback_strategy":"immediate","surprise":1}"#);
        assert!(err.is_err());
    }
}
