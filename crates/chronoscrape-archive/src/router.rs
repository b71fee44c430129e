//! Ordered multi-source fallback router.
//!
//! Strategies are attempted strictly sequentially, each under a hard
//! per-strategy deadline, with classified errors deciding whether the chain
//! advances. Per-source metrics drive hybrid ordering and health reporting.

use crate::cdx::{CaptureQuery, QueryStats};
use crate::config::{ArchiveSourceConfig, FallbackStrategy, ProxyEndpoint, RoutingConfig, SmartproxyConfig};
use crate::error::{error_type_label, ArchiveError, AttemptRecord};
use crate::metrics::{RouterHealth, SourceMetrics, SourceMetricsSnapshot};
use crate::paginator::ParallelPaginator;
use crate::sources::{
    ArchiveSourceStrategy, CommonCrawl, CommonCrawlDirect, CommonCrawlProxy, CommonCrawlSmartproxy,
    InternetArchive, WaybackMachine,
};
use chronoscrape_reliability::{CircuitBreaker, CircuitBreakerConfig, RealClock, State};
use chronoscrape_types::{ArchiveSource, CdxRecord, ErrorKind};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Queries kept in the rolling history for diagnostics.
const MAX_QUERY_HISTORY: usize = 1000;

/// Combined result statistics of one unified query.
#[derive(Debug, Clone, Serialize)]
pub struct UnifiedStats {
    pub successful_source: String,
    pub primary_source: String,
    pub fallback_used: bool,
    pub total_duration_secs: f64,
    pub attempts: Vec<AttemptRecord>,
    #[serde(flatten)]
    pub query: QueryStats,
}

/// External collaborators needed to assemble the default strategy chain.
pub struct SourceSetup {
    pub crawl_id: String,
    pub smartproxy: Option<SmartproxyConfig>,
    pub proxies: Vec<ProxyEndpoint>,
    pub cache_dir: PathBuf,
}

pub struct ArchiveRouter {
    config: RoutingConfig,
    strategies: Vec<Arc<dyn ArchiveSourceStrategy>>,
    metrics: HashMap<&'static str, Arc<SourceMetrics>>,
    history: Mutex<VecDeque<AttemptRecord>>,
}

impl ArchiveRouter {
    pub fn new(config: RoutingConfig, strategies: Vec<Arc<dyn ArchiveSourceStrategy>>) -> Self {
        let metrics = strategies
            .iter()
            .map(|s| (s.name(), Arc::new(SourceMetrics::new(s.name()))))
            .collect();
        Self {
            config,
            strategies,
            metrics,
            history: Mutex::new(VecDeque::with_capacity(MAX_QUERY_HISTORY)),
        }
    }

    /// Assemble the full default chain: Wayback, Common Crawl, the proxy
    /// variants, direct index processing and the Internet Archive fallback,
    /// each behind its own breaker tuned to the provider's temperament.
    pub fn with_default_sources(
        config: RoutingConfig,
        setup: SourceSetup,
    ) -> Result<Self, ArchiveError> {
        let paginator = Arc::new(ParallelPaginator::default());
        let clock = Arc::new(RealClock);
        let mut strategies: Vec<Arc<dyn ArchiveSourceStrategy>> = Vec::new();

        let breaker = |failure_threshold, success_threshold, timeout_secs, max_timeout_secs| {
            CircuitBreaker::new(
                CircuitBreakerConfig {
                    failure_threshold,
                    success_threshold,
                    timeout_secs,
                    max_timeout_secs,
                    exponential_backoff: true,
                    sliding_window_size: 10,
                },
                clock.clone(),
            )
        };

        if config.wayback.enabled {
            strategies.push(Arc::new(WaybackMachine::new(
                config.wayback.clone(),
                breaker(5, 3, 60, 300),
                paginator.clone(),
            )?));
        }
        if config.common_crawl.enabled {
            strategies.push(Arc::new(CommonCrawl::new(
                &setup.crawl_id,
                config.common_crawl.clone(),
                breaker(5, 3, 90, 600),
                paginator.clone(),
            )?));
        }
        if config.enable_smartproxy_fallback {
            if let Some(proxy) = &setup.smartproxy {
                strategies.push(Arc::new(CommonCrawlSmartproxy::new(
                    &setup.crawl_id,
                    proxy,
                    ArchiveSourceConfig {
                        page_size: 2000,
                        max_pages: Some(3),
                        timeout_secs: 180,
                        ..ArchiveSourceConfig::default()
                    },
                    breaker(3, 2, 180, 900),
                    paginator.clone(),
                )?));
            }
        }
        if config.enable_proxy_fallback && !setup.proxies.is_empty() {
            strategies.push(Arc::new(CommonCrawlProxy::new(
                &setup.crawl_id,
                setup.proxies.clone(),
                ArchiveSourceConfig {
                    page_size: 2000,
                    max_pages: Some(3),
                    ..ArchiveSourceConfig::default()
                },
                breaker(3, 2, 120, 600),
                paginator.clone(),
            )));
        }
        if config.enable_direct_fallback {
            strategies.push(Arc::new(CommonCrawlDirect::new(
                setup.cache_dir.clone(),
                breaker(2, 1, 300, 1200),
            )?));
        }
        if config.enable_ia_fallback {
            strategies.push(Arc::new(InternetArchive::new(
                ArchiveSourceConfig {
                    page_size: 3000,
                    max_pages: Some(5),
                    ..ArchiveSourceConfig::default()
                },
                breaker(3, 2, 60, 300),
                paginator.clone(),
            )?));
        }

        Ok(Self::new(config, strategies))
    }

    fn strategy(&self, name: &str) -> Option<&Arc<dyn ArchiveSourceStrategy>> {
        self.strategies.iter().find(|s| s.name() == name)
    }

    fn has_strategy(&self, name: &str) -> bool {
        self.strategy(name).is_some()
    }

    /// Source order per the routing preference. Hybrid orders by
    /// `(priority, -success_rate)`; the enhanced Common Crawl fallbacks and
    /// the Internet Archive tail are appended per their enable flags.
    fn source_order(&self, archive_source: ArchiveSource) -> Vec<&'static str> {
        let mut order: Vec<&'static str> = match archive_source {
            ArchiveSource::Wayback => vec!["wayback_machine"],
            ArchiveSource::CommonCrawl => vec!["common_crawl"],
            ArchiveSource::Hybrid => {
                let mut candidates: Vec<(&'static str, u32)> = Vec::new();
                if self.config.wayback.enabled {
                    candidates.push(("wayback_machine", self.config.wayback.priority));
                }
                if self.config.common_crawl.enabled {
                    candidates.push(("common_crawl", self.config.common_crawl.priority));
                }
                candidates.sort_by(|a, b| {
                    let rate =
                        |name: &str| self.metrics.get(name).map(|m| m.success_rate()).unwrap_or(0.0);
                    a.1.cmp(&b.1)
                        .then(rate(b.0).partial_cmp(&rate(a.0)).unwrap_or(std::cmp::Ordering::Equal))
                });
                candidates.into_iter().map(|(name, _)| name).collect()
            }
        };

        if matches!(archive_source, ArchiveSource::CommonCrawl | ArchiveSource::Hybrid) {
            if self.config.enable_smartproxy_fallback {
                order.push("smartproxy_cc");
            }
            if self.config.enable_proxy_fallback {
                order.push("proxy_cc");
            }
            if self.config.enable_direct_fallback {
                order.push("direct_cc");
            }
        }
        if self.config.enable_ia_fallback {
            order.push("internet_archive");
        }

        let mut seen = std::collections::HashSet::new();
        order
            .into_iter()
            .filter(|name| self.has_strategy(name) && seen.insert(*name))
            .collect()
    }

    fn should_fallback(&self, kind: ErrorKind, retriable: bool) -> bool {
        // A strategy deadline means the source is wedged; always move on.
        if kind == ErrorKind::StrategyTimeout {
            return true;
        }
        match self.config.fallback_strategy {
            FallbackStrategy::Immediate => true,
            FallbackStrategy::RetryThenFallback => !retriable || kind == ErrorKind::CircuitOpen,
            FallbackStrategy::CircuitBreaker => kind == ErrorKind::CircuitOpen,
        }
    }

    fn push_history(&self, record: AttemptRecord) {
        let mut history = self.history.lock();
        if history.len() == MAX_QUERY_HISTORY {
            history.pop_front();
        }
        history.push_back(record);
    }

    /// Query captures with ordered fallback across the configured sources.
    pub async fn query_unified(
        &self,
        archive_source: ArchiveSource,
        fallback_enabled: bool,
        query: &CaptureQuery,
    ) -> Result<(Vec<CdxRecord>, UnifiedStats), ArchiveError> {
        let mut order = self.source_order(archive_source);
        if !fallback_enabled {
            order.truncate(1);
        }
        order.truncate(self.config.max_fallback_attempts);

        if order.is_empty() {
            return Err(ArchiveError::Api("no enabled archive sources configured".into()));
        }

        info!(domain = %query.domain, ?order, "starting unified archive query");

        let primary_source = order[0].to_string();
        let query_start = Instant::now();
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut delay_secs = self.config.fallback_delay_secs;
        let deadline = Duration::from_secs_f64(self.config.per_strategy_timeout_secs);

        for (index, name) in order.iter().enumerate() {
            let strategy = self.strategy(name).expect("order only lists known strategies");
            let metrics = &self.metrics[strategy.name()];
            let attempt_start = Instant::now();

            info!(
                source = strategy.name(),
                attempt = index + 1,
                total = order.len(),
                domain = %query.domain,
                "attempting archive source"
            );

            let outcome = tokio::time::timeout(deadline, strategy.query_captures(query)).await;
            let duration_secs = attempt_start.elapsed().as_secs_f64();

            let (err, kind, retriable) = match outcome {
                Ok(Ok((records, query_stats))) => {
                    metrics.record_success(duration_secs, records.len());
                    let attempt = AttemptRecord {
                        source: strategy.name().to_string(),
                        success: true,
                        duration_secs,
                        records: records.len(),
                        error: None,
                        error_type: None,
                    };
                    self.push_history(attempt.clone());
                    attempts.push(attempt);

                    let stats = UnifiedStats {
                        successful_source: strategy.name().to_string(),
                        primary_source,
                        fallback_used: index > 0,
                        total_duration_secs: query_start.elapsed().as_secs_f64(),
                        attempts,
                        query: query_stats,
                    };
                    info!(
                        source = strategy.name(),
                        records = records.len(),
                        fallback_used = stats.fallback_used,
                        "unified query succeeded"
                    );
                    return Ok((records, stats));
                }
                Ok(Err(err)) => {
                    let kind = strategy.classify(&err);
                    let retriable = strategy.is_retriable(&err);
                    (err, kind, retriable)
                }
                Err(_elapsed) => {
                    // The in-flight call was cancelled before it could record
                    // its own outcome, so the breaker hears about it here.
                    strategy.breaker().on_failure();
                    let err = ArchiveError::StrategyTimeout(deadline);
                    (err, ErrorKind::StrategyTimeout, false)
                }
            };

            let error_type = error_type_label(strategy.error_label(), kind);
            metrics.record_failure(duration_secs, &error_type);
            let attempt = AttemptRecord {
                source: strategy.name().to_string(),
                success: false,
                duration_secs,
                records: 0,
                error: Some(err.to_string()),
                error_type: Some(error_type.clone()),
            };
            self.push_history(attempt.clone());
            attempts.push(attempt);

            warn!(
                source = strategy.name(),
                error = %err,
                error_type = %error_type,
                "archive source attempt failed"
            );

            let remaining = order.len() - index - 1;
            if remaining == 0 {
                break;
            }
            if !self.should_fallback(kind, retriable) {
                warn!(
                    source = strategy.name(),
                    policy = ?self.config.fallback_strategy,
                    "fallback policy stops the chain here"
                );
                break;
            }

            tokio::time::sleep(Duration::from_secs_f64(delay_secs)).await;
            if self.config.exponential_backoff {
                delay_secs = (delay_secs * 2.0).min(self.config.max_fallback_delay);
            }
        }

        error!(domain = %query.domain, attempts = attempts.len(), "all archive sources failed");
        Err(ArchiveError::AllSourcesFailed {
            domain: query.domain.clone(),
            attempt_count: attempts.len(),
            attempts,
        })
    }

    /// Health of the router: `Healthy` when every configured source has a
    /// non-open breaker and a healthy success rate, `Degraded` when at least
    /// one does, `Unhealthy` otherwise.
    pub fn health(&self) -> RouterHealth {
        let mut healthy = 0usize;
        for strategy in &self.strategies {
            let breaker_ok = strategy.breaker().state() != State::Open;
            let metrics_ok = self.metrics[strategy.name()].snapshot().is_healthy;
            if breaker_ok && metrics_ok {
                healthy += 1;
            }
        }
        if healthy == self.strategies.len() && !self.strategies.is_empty() {
            RouterHealth::Healthy
        } else if healthy > 0 {
            RouterHealth::Degraded
        } else {
            RouterHealth::Unhealthy
        }
    }

    pub fn metrics_snapshot(&self) -> Vec<SourceMetricsSnapshot> {
        self.strategies
            .iter()
            .map(|s| self.metrics[s.name()].snapshot())
            .collect()
    }

    pub fn query_history(&self) -> Vec<AttemptRecord> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn reset_metrics(&self) {
        for metrics in self.metrics.values() {
            metrics.reset();
        }
        self.history.lock().clear();
    }
}
