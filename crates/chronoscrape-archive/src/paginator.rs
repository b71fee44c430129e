//! High-throughput parallel CDX pagination with the content-filter pipeline
//! and per-domain performance learning.

use crate::cdx::{CaptureQuery, PagedCdxClient, QueryStats};
use crate::error::ArchiveError;
use crate::filters;
use chronoscrape_types::CdxRecord;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Paginator tuning knobs.
#[derive(Debug, Clone)]
pub struct PaginatorConfig {
    /// Concurrent page fetches inside one batch.
    pub max_workers: usize,
    /// Pages per batch; a barrier sits between batches.
    pub batch_size: usize,
    /// Pause between batches to bound upstream pressure.
    pub inter_batch_delay_ms: u64,
    /// Page-count threshold past which the provider resume cursor is used.
    pub resume_key_threshold: u64,
}

impl Default for PaginatorConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            batch_size: 10,
            inter_batch_delay_ms: 500,
            resume_key_threshold: 50,
        }
    }
}

/// Settings recommendation derived from a domain's observed performance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptimalSettings {
    pub page_size: u32,
    pub max_workers: usize,
    pub batch_size: usize,
    pub max_pages: u32,
}

#[derive(Debug, Default)]
struct DomainPerformance {
    total_fetches: u64,
    total_records: u64,
    total_secs: f64,
    /// Recent per-run page success ratios, percent. Last ten runs.
    success_rates: VecDeque<f64>,
}

impl DomainPerformance {
    fn avg_success_rate(&self) -> f64 {
        if self.success_rates.is_empty() {
            0.0
        } else {
            self.success_rates.iter().sum::<f64>() / self.success_rates.len() as f64
        }
    }

    fn records_per_second(&self) -> f64 {
        if self.total_secs > 0.0 {
            self.total_records as f64 / self.total_secs
        } else {
            0.0
        }
    }
}

/// Parallel CDX paginator. One instance is shared across domains; the
/// per-domain performance map feeds [`ParallelPaginator::optimal_settings`].
pub struct ParallelPaginator {
    config: PaginatorConfig,
    performance: DashMap<String, DomainPerformance>,
}

impl ParallelPaginator {
    pub fn new(config: PaginatorConfig) -> Self {
        Self {
            config,
            performance: DashMap::new(),
        }
    }

    /// Fetch and filter every page of `query` through `client`.
    ///
    /// Page jobs run in batches of `batch_size` with at most `max_workers`
    /// in flight; the merged stream is ordered by `(page, line)`. Individual
    /// page failures are counted, not fatal. The probe and every page fetch
    /// run under the client's circuit breaker.
    pub async fn fetch_filtered(
        &self,
        client: &dyn PagedCdxClient,
        query: &CaptureQuery,
    ) -> Result<(Vec<CdxRecord>, QueryStats), ArchiveError> {
        let started = Instant::now();
        let mut stats = QueryStats::default();

        let total_pages = client.page_count(query).await?;
        stats.total_pages = total_pages;
        if total_pages == 0 {
            debug!(domain = %query.domain, "no CDX pages for query");
            stats.duration_secs = started.elapsed().as_secs_f64();
            return Ok((Vec::new(), stats));
        }

        let pages_to_fetch = query
            .max_pages
            .map(|m| (m as u64).min(total_pages))
            .unwrap_or(total_pages);
        let start_page = query.resume_from_page as u64;
        if start_page >= pages_to_fetch {
            warn!(
                domain = %query.domain,
                start_page,
                pages_to_fetch,
                "resume cursor is past the last page, nothing to fetch"
            );
            stats.duration_secs = started.elapsed().as_secs_f64();
            return Ok((Vec::new(), stats));
        }
        let attempted_pages = pages_to_fetch - start_page;
        let use_resume_key = total_pages > self.config.resume_key_threshold;

        info!(
            domain = %query.domain,
            total_pages,
            attempted_pages,
            start_page,
            "starting parallel CDX fetch"
        );

        let pages: Vec<u32> = (start_page as u32..pages_to_fetch as u32).collect();
        let mut page_results: Vec<(u32, Vec<CdxRecord>)> = Vec::with_capacity(pages.len());

        let batches: Vec<&[u32]> = pages.chunks(self.config.batch_size).collect();
        let batch_count = batches.len();
        for (batch_index, batch) in batches.into_iter().enumerate() {
            let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
            let futures = batch.iter().map(|&page| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore never closed");
                    (page, client.fetch_page(query, page, use_resume_key).await)
                }
            });

            for (page, result) in join_all(futures).await {
                match result {
                    Ok(records) => {
                        stats.fetched_pages += 1;
                        page_results.push((page, records));
                    }
                    Err(err) => {
                        stats.failed_pages += 1;
                        warn!(domain = %query.domain, page, error = %err, "CDX page fetch failed");
                    }
                }
            }

            if batch_index + 1 < batch_count {
                tokio::time::sleep(Duration::from_millis(self.config.inter_batch_delay_ms)).await;
            }
        }

        // Global order is page-ascending; line order inside a page is already
        // the provider's.
        page_results.sort_by_key(|(page, _)| *page);
        let all_records: Vec<CdxRecord> = page_results
            .into_iter()
            .flat_map(|(_, records)| records)
            .collect();
        stats.total_records = all_records.len() as u64;

        // Filter pipeline, fixed order.
        let (records, size_filtered) =
            filters::filter_by_size(all_records, query.min_size, query.max_size);
        stats.size_filtered = size_filtered;
        let (records, attachment_filtered) =
            filters::filter_attachments(records, query.include_attachments);
        stats.attachment_filtered = attachment_filtered;
        let (records, list_filtered) = filters::filter_list_pages(records);
        stats.list_filtered = list_filtered;
        let (records, duplicate_filtered) =
            filters::filter_duplicates(records, &query.existing_digests);
        stats.duplicate_filtered = duplicate_filtered;

        stats.final_count = records.len() as u64;
        stats.duration_secs = started.elapsed().as_secs_f64();
        stats.records_per_second = if stats.duration_secs > 0.0 {
            stats.total_records as f64 / stats.duration_secs
        } else {
            0.0
        };

        self.record_performance(&query.domain, attempted_pages, &stats);

        info!(
            domain = %query.domain,
            total = stats.total_records,
            kept = stats.final_count,
            size_filtered = stats.size_filtered,
            list_filtered = stats.list_filtered,
            duplicate_filtered = stats.duplicate_filtered,
            "parallel CDX fetch complete"
        );

        Ok((records, stats))
    }

    fn record_performance(&self, domain: &str, attempted_pages: u64, stats: &QueryStats) {
        let mut perf = self.performance.entry(domain.to_string()).or_default();
        perf.total_fetches += 1;
        perf.total_records += stats.total_records;
        perf.total_secs += stats.duration_secs;
        let success_rate = stats.fetched_pages as f64 / attempted_pages.max(1) as f64 * 100.0;
        if perf.success_rates.len() == 10 {
            perf.success_rates.pop_front();
        }
        perf.success_rates.push_back(success_rate);
    }

    /// Recommended settings for the next run against `domain`, learned from
    /// its history. Unknown domains get the standard tier.
    pub fn optimal_settings(&self, domain: &str) -> OptimalSettings {
        let Some(perf) = self.performance.get(domain) else {
            return OptimalSettings {
                page_size: 3000,
                max_workers: 8,
                batch_size: 10,
                max_pages: 20,
            };
        };

        let success = perf.avg_success_rate();
        let rps = perf.records_per_second();

        if success > 95.0 && rps > 50.0 {
            OptimalSettings {
                page_size: 5000,
                max_workers: 12,
                batch_size: 15,
                max_pages: 100,
            }
        } else if success > 80.0 && rps > 20.0 {
            OptimalSettings {
                page_size: 3000,
                max_workers: 8,
                batch_size: 10,
                max_pages: 50,
            }
        } else {
            OptimalSettings {
                page_size: 1000,
                max_workers: 4,
                batch_size: 5,
                max_pages: 20,
            }
        }
    }
}

impl Default for ParallelPaginator {
    fn default() -> Self {
        Self::new(PaginatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Paged client serving canned pages, with a page-count probe and an
    /// optional failing page.
    struct FakeClient {
        pages: Vec<Vec<CdxRecord>>,
        failing_page: Option<u32>,
        calls: AtomicU64,
    }

    #[async_trait]
    impl PagedCdxClient for FakeClient {
        async fn page_count(&self, _query: &CaptureQuery) -> Result<u64, ArchiveError> {
            Ok(self.pages.len() as u64)
        }

        async fn fetch_page(
            &self,
            _query: &CaptureQuery,
            page: u32,
            _use_resume_key: bool,
        ) -> Result<Vec<CdxRecord>, ArchiveError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if Some(page) == self.failing_page {
                return Err(ArchiveError::Timeout("page fetch".into()));
            }
            Ok(self.pages[page as usize].clone())
        }
    }

    fn record(url: &str, digest: &str) -> CdxRecord {
        CdxRecord {
            timestamp: "20200315120000".into(),
            original_url: url.into(),
            mime_type: "text/html".into(),
            status_code: 200,
            digest: digest.into(),
            length: Some(2048),
        }
    }

    fn query() -> CaptureQuery {
        CaptureQuery::new("example.com", "20200101", "20200131")
    }

    fn paginator() -> ParallelPaginator {
        ParallelPaginator::new(PaginatorConfig {
            inter_batch_delay_ms: 0,
            ..PaginatorConfig::default()
        })
    }

    #[tokio::test]
    async fn zero_pages_returns_empty_without_page_work() {
        let client = FakeClient {
            pages: vec![],
            failing_page: None,
            calls: AtomicU64::new(0),
        };
        let (records, stats) = paginator().fetch_filtered(&client, &query()).await.unwrap();
        assert!(records.is_empty());
        assert_eq!(stats.total_pages, 0);
        assert_eq!(client.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn merges_pages_in_order_and_dedups() {
        let client = FakeClient {
            pages: vec![
                vec![
                    record("https://example.com/articles/first-long-piece", "D1"),
                    record("https://example.com/articles/second-long-piece", "D2"),
                ],
                vec![
                    record("https://example.com/articles/second-copy-piece", "D2"),
                    record("https://example.com/articles/fifth-long-piece", "D5"),
                ],
            ],
            failing_page: None,
            calls: AtomicU64::new(0),
        };
        let mut q = query();
        q.existing_digests = ["D0".to_string()].into_iter().collect::<HashSet<_>>();

        let (records, stats) = paginator().fetch_filtered(&client, &q).await.unwrap();
        let digests: Vec<_> = records.iter().map(|r| r.digest.as_str()).collect();
        assert_eq!(digests, ["D1", "D2", "D5"]);
        assert_eq!(stats.duplicate_filtered, 1);
        assert_eq!(stats.fetched_pages, 2);
    }

    #[tokio::test]
    async fn failed_pages_are_counted_not_fatal() {
        let client = FakeClient {
            pages: vec![
                vec![record("https://example.com/articles/first-long-piece", "D1")],
                vec![record("https://example.com/articles/second-long-piece", "D2")],
            ],
            failing_page: Some(1),
            calls: AtomicU64::new(0),
        };
        let (records, stats) = paginator().fetch_filtered(&client, &query()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(stats.fetched_pages, 1);
        assert_eq!(stats.failed_pages, 1);
    }

    #[tokio::test]
    async fn max_pages_is_clamped_and_resume_skips() {
        let client = FakeClient {
            pages: vec![
                vec![record("https://example.com/articles/first-long-piece", "D1")],
                vec![record("https://example.com/articles/second-long-piece", "D2")],
                vec![record("https://example.com/articles/third-long-piece", "D3")],
            ],
            failing_page: None,
            calls: AtomicU64::new(0),
        };
        let mut q = query();
        q.max_pages = Some(10);
        q.resume_from_page = 2;
        let (records, _) = paginator().fetch_filtered(&client, &q).await.unwrap();
        let digests: Vec<_> = records.iter().map(|r| r.digest.as_str()).collect();
        assert_eq!(digests, ["D3"]);

        // Resume past the clamp yields nothing.
        q.resume_from_page = 3;
        let (records, stats) = paginator().fetch_filtered(&client, &q).await.unwrap();
        assert!(records.is_empty());
        assert_eq!(stats.fetched_pages, 0);
    }

    #[tokio::test]
    async fn optimal_settings_tiers() {
        let paginator = paginator();
        assert_eq!(
            paginator.optimal_settings("never-seen.example"),
            OptimalSettings {
                page_size: 3000,
                max_workers: 8,
                batch_size: 10,
                max_pages: 20
            }
        );

        // Simulate a poor run: zero records fetched, one failed page.
        let client = FakeClient {
            pages: vec![vec![]],
            failing_page: Some(0),
            calls: AtomicU64::new(0),
        };
        let q = query();
        let _ = paginator.fetch_filtered(&client, &q).await.unwrap();
        assert_eq!(
            paginator.optimal_settings("example.com"),
            OptimalSettings {
                page_size: 1000,
                max_workers: 4,
                batch_size: 5,
                max_pages: 20
            }
        );
    }
}
