//! Per-source performance accounting for the router.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

/// Overall router health, derived from breaker states and source metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterHealth {
    /// Every configured source is healthy with a closed breaker.
    Healthy,
    /// At least one source is still usable.
    Degraded,
    Unhealthy,
}

#[derive(Debug, Default)]
struct MetricsInner {
    total_queries: u64,
    successful_queries: u64,
    failed_queries: u64,
    total_records: u64,
    avg_response_time: f64,
    last_success_time: Option<DateTime<Utc>>,
    last_failure_time: Option<DateTime<Utc>>,
    error_counts: HashMap<String, u64>,
}

/// Aggregate metrics for one archive source. Updates take a short mutex;
/// read paths copy a snapshot.
#[derive(Debug)]
pub struct SourceMetrics {
    source_name: String,
    inner: Mutex<MetricsInner>,
}

/// Exponential moving average weight for response times.
const EMA_ALPHA: f64 = 0.2;

impl SourceMetrics {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            inner: Mutex::new(MetricsInner::default()),
        }
    }

    pub fn record_success(&self, duration_secs: f64, records: usize) {
        let mut inner = self.inner.lock();
        inner.total_queries += 1;
        inner.successful_queries += 1;
        inner.total_records += records as u64;
        inner.last_success_time = Some(Utc::now());
        inner.avg_response_time = if inner.total_queries == 1 {
            duration_secs
        } else {
            EMA_ALPHA * duration_secs + (1.0 - EMA_ALPHA) * inner.avg_response_time
        };
    }

    pub fn record_failure(&self, _duration_secs: f64, error_type: &str) {
        let mut inner = self.inner.lock();
        inner.total_queries += 1;
        inner.failed_queries += 1;
        inner.last_failure_time = Some(Utc::now());
        *inner.error_counts.entry(error_type.to_string()).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> SourceMetricsSnapshot {
        let inner = self.inner.lock();
        let success_rate = if inner.total_queries == 0 {
            0.0
        } else {
            inner.successful_queries as f64 / inner.total_queries as f64 * 100.0
        };
        SourceMetricsSnapshot {
            source_name: self.source_name.clone(),
            total_queries: inner.total_queries,
            successful_queries: inner.successful_queries,
            failed_queries: inner.failed_queries,
            total_records: inner.total_records,
            avg_response_time: inner.avg_response_time,
            success_rate,
            is_healthy: success_rate >= 80.0,
            last_success_time: inner.last_success_time,
            last_failure_time: inner.last_failure_time,
            error_counts: inner.error_counts.clone(),
        }
    }

    /// Success rate in percent; 0 when the source has never been queried.
    pub fn success_rate(&self) -> f64 {
        self.snapshot().success_rate
    }

    pub fn reset(&self) {
        *self.inner.lock() = MetricsInner::default();
    }
}

/// Point-in-time copy of one source's metrics.
#[derive(Debug, Clone, Serialize)]
pub struct SourceMetricsSnapshot {
    pub source_name: String,
    pub total_queries: u64,
    pub successful_queries: u64,
    pub failed_queries: u64,
    pub total_records: u64,
    pub avg_response_time: f64,
    pub success_rate: f64,
    pub is_healthy: bool,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub error_counts: HashMap<String, u64>,
}
