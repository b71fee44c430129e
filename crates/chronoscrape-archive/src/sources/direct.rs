//! Direct Common Crawl index processing.
//!
//! Bypasses the index API entirely: downloads the monthly
//! `cc-index/collections/<crawl>/indexes/cdx-NNNNN.gz` segments, streams
//! them line by line through a gzip decoder, and filters locally by domain
//! pattern and date window. Segments are cached on disk keyed by
//! `(crawl_id, segment)` so repeated queries do not re-download.

use super::ArchiveSourceStrategy;
use crate::cdx::{CaptureQuery, QueryStats};
use crate::error::ArchiveError;
use crate::filters;
use async_trait::async_trait;
use chronoscrape_reliability::{guarded_call, CircuitBreaker, GuardedError};
use chronoscrape_types::{CdxRecord, ErrorKind, MatchType};
use flate2::read::GzDecoder;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const CC_DATA_HOST: &str = "https://data.commoncrawl.org";

/// Recent monthly crawls, newest first. The strategy walks them in order
/// until a segment yields records.
const RECENT_CRAWLS: &[&str] = &[
    "CC-MAIN-2024-33",
    "CC-MAIN-2024-30",
    "CC-MAIN-2024-26",
];

/// Hard cap per segment so a broad domain pattern cannot exhaust memory.
const MAX_RECORDS_PER_SEGMENT: usize = 10_000;

pub struct CommonCrawlDirect {
    client: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    cache_dir: PathBuf,
    data_host: String,
    crawl_ids: Vec<String>,
    /// Index segments examined per crawl.
    segments_per_crawl: u32,
}

impl CommonCrawlDirect {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, ArchiveError> {
        Self::with_host(CC_DATA_HOST, cache_dir, breaker)
    }

    pub fn with_host(
        data_host: &str,
        cache_dir: impl Into<PathBuf>,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, ArchiveError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ArchiveError::Api(e.to_string()))?;
        Ok(Self {
            client,
            breaker,
            cache_dir: cache_dir.into(),
            data_host: data_host.to_string(),
            crawl_ids: RECENT_CRAWLS.iter().map(|s| s.to_string()).collect(),
            segments_per_crawl: 1,
        })
    }

    pub fn with_crawls(mut self, crawl_ids: Vec<String>) -> Self {
        self.crawl_ids = crawl_ids;
        self
    }

    fn segment_url(&self, crawl_id: &str, segment: u32) -> String {
        format!(
            "{}/cc-index/collections/{}/indexes/cdx-{:05}.gz",
            self.data_host, crawl_id, segment
        )
    }

    fn cache_path(&self, crawl_id: &str, segment: u32) -> PathBuf {
        self.cache_dir.join(format!("{crawl_id}-{segment:05}.gz"))
    }

    async fn ensure_segment(&self, crawl_id: &str, segment: u32) -> Result<PathBuf, ArchiveError> {
        let path = self.cache_path(crawl_id, segment);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "index segment cache hit");
            return Ok(path);
        }

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let url = self.segment_url(crawl_id, segment);
        info!(url = %url, "downloading index segment");

        let bytes = guarded_call(&self.breaker, || async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(ArchiveError::from_reqwest)?;
            let status = response.status().as_u16();
            if status >= 400 {
                return Err(ArchiveError::Server {
                    status,
                    message: format!("segment download failed: {url}"),
                });
            }
            response.bytes().await.map_err(ArchiveError::from_reqwest)
        })
        .await
        .map_err(|err| match err {
            GuardedError::Rejected(_) => ArchiveError::CircuitOpen {
                source_name: "direct_cc",
            },
            GuardedError::Inner(inner) => inner,
        })?;

        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }

    /// Scan one cached segment for matching records. Runs on the blocking
    /// pool: gzip decode plus line parsing is pure CPU and file I/O.
    async fn scan_segment(
        &self,
        path: PathBuf,
        query: &CaptureQuery,
    ) -> Result<Vec<CdxRecord>, ArchiveError> {
        let domain = query.domain.clone();
        let match_type = query.match_type;
        let url_path = query.url_path.clone();
        let from_date = query.from_date.clone();
        let to_date = query.to_date.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<CdxRecord>, ArchiveError> {
            let file = std::fs::File::open(&path)?;
            let reader = BufReader::new(GzDecoder::new(file));
            let mut matches = Vec::new();

            for line in reader.lines() {
                let line = line?;
                let Some(record) = parse_cdx_line(&line) else {
                    continue;
                };
                if filters::is_static_asset(&record.original_url) {
                    continue;
                }
                if !matches_domain(&record, &domain, match_type, url_path.as_deref()) {
                    continue;
                }
                if !within_date_range(&record, &from_date, &to_date) {
                    continue;
                }
                matches.push(record);
                if matches.len() >= MAX_RECORDS_PER_SEGMENT {
                    warn!(segment = %path.display(), "segment record cap reached");
                    break;
                }
            }
            Ok(matches)
        })
        .await
        .map_err(|e| ArchiveError::Api(format!("segment scan task failed: {e}")))?
    }
}

/// Parse one space-separated CDX index line (11+ fields). Only status-200
/// HTML/PDF captures survive, matching the server-side filter the API-backed
/// strategies apply.
fn parse_cdx_line(line: &str) -> Option<CdxRecord> {
    let parts: Vec<&str> = line.trim().split(' ').collect();
    if parts.len() < 11 {
        return None;
    }
    let (timestamp, original_url, mime_type, status, digest, length) =
        (parts[1], parts[2], parts[3], parts[4], parts[5], parts[7]);

    if mime_type != "text/html" && mime_type != "application/pdf" {
        return None;
    }
    if status != "200" {
        return None;
    }

    Some(CdxRecord {
        timestamp: timestamp.to_string(),
        original_url: original_url.to_string(),
        mime_type: mime_type.to_string(),
        status_code: status.parse().ok()?,
        digest: digest.to_string(),
        length: length.parse().ok(),
    })
}

fn matches_domain(
    record: &CdxRecord,
    domain: &str,
    match_type: MatchType,
    url_path: Option<&str>,
) -> bool {
    let Ok(parsed) = url::Url::parse(&record.original_url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();

    match match_type {
        MatchType::Exact => host == domain,
        MatchType::Domain => host == domain || host.ends_with(&format!(".{domain}")),
        MatchType::Prefix => {
            let prefix = url_path.map(str::to_ascii_lowercase).unwrap_or(domain);
            record.original_url.to_ascii_lowercase().starts_with(&prefix)
        }
        MatchType::Regex => regex::Regex::new(&domain)
            .map(|re| re.is_match(&host))
            .unwrap_or(false),
    }
}

fn within_date_range(record: &CdxRecord, from_date: &str, to_date: &str) -> bool {
    if record.timestamp.len() < 8 {
        return true;
    }
    let date = &record.timestamp[..8];
    from_date <= date && date <= to_date
}

#[async_trait]
impl ArchiveSourceStrategy for CommonCrawlDirect {
    fn name(&self) -> &'static str {
        "direct_cc"
    }

    fn error_label(&self) -> &'static str {
        "direct"
    }

    fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    async fn query_captures(
        &self,
        query: &CaptureQuery,
    ) -> Result<(Vec<CdxRecord>, QueryStats), ArchiveError> {
        let started = Instant::now();
        let mut stats = QueryStats::default();
        let mut all_records = Vec::new();

        'crawls: for crawl_id in &self.crawl_ids {
            for segment in 0..self.segments_per_crawl {
                let path = self.ensure_segment(crawl_id, segment).await?;
                let records = self.scan_segment(path, query).await?;
                stats.fetched_pages += 1;
                all_records.extend(records);
                if !all_records.is_empty() {
                    break 'crawls;
                }
            }
        }

        stats.total_records = all_records.len() as u64;
        stats.total_pages = stats.fetched_pages;

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

        info!(
            domain = %query.domain,
            kept = stats.final_count,
            total = stats.total_records,
            "direct index processing complete"
        );
        Ok((records, stats))
    }

    fn is_retriable(&self, err: &ArchiveError) -> bool {
        matches!(
            err.kind(),
            ErrorKind::ConnectionError | ErrorKind::Timeout | ErrorKind::ServerError
        )
    }
}
