//! CDX protocol plumbing: query shape, URL grammar, response parsing and the
//! paged HTTP client shared by every CDX-speaking strategy.

use crate::config::ArchiveSourceConfig;
use crate::error::ArchiveError;
use crate::filters;
use async_trait::async_trait;
use chronoscrape_reliability::{guarded_call, CircuitBreaker, GuardedError};
use chronoscrape_types::{CdxRecord, MatchType};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; ChronoScrape/2.0; +https://chronoscrape.com)";

/// One logical capture query against an archive source.
#[derive(Debug, Clone)]
pub struct CaptureQuery {
    pub domain: String,
    /// `YYYYMMDD`
    pub from_date: String,
    /// `YYYYMMDD`
    pub to_date: String,
    pub match_type: MatchType,
    pub url_path: Option<String>,
    pub min_size: u64,
    pub max_size: u64,
    pub page_size: u32,
    pub max_pages: Option<u32>,
    pub include_attachments: bool,
    /// CDX page index to resume pagination from.
    pub resume_from_page: u32,
    /// Digests already processed; seeds the duplicate filter.
    pub existing_digests: HashSet<String>,
}

impl CaptureQuery {
    pub fn new(
        domain: impl Into<String>,
        from_date: impl Into<String>,
        to_date: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            from_date: from_date.into(),
            to_date: to_date.into(),
            match_type: MatchType::Domain,
            url_path: None,
            min_size: 200,
            max_size: 10 * 1024 * 1024,
            page_size: 5000,
            max_pages: None,
            include_attachments: true,
            resume_from_page: 0,
            existing_digests: HashSet::new(),
        }
    }
}

/// Aggregate statistics of one capture query: pagination counters plus the
/// per-pass filter counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryStats {
    pub total_pages: u64,
    pub fetched_pages: u64,
    pub failed_pages: u64,
    pub total_records: u64,
    pub static_filtered: u64,
    pub size_filtered: u64,
    pub attachment_filtered: u64,
    pub list_filtered: u64,
    pub duplicate_filtered: u64,
    pub final_count: u64,
    pub duration_secs: f64,
    pub records_per_second: f64,
}

/// Page-level capability the paginator drives. Implemented by every strategy
/// whose provider speaks the paged CDX protocol.
#[async_trait]
pub trait PagedCdxClient: Send + Sync {
    /// Probe the number of CDX pages the query spans. Zero means no data.
    async fn page_count(&self, query: &CaptureQuery) -> Result<u64, ArchiveError>;

    /// Fetch one page of normalized capture records, preserving line order.
    async fn fetch_page(
        &self,
        query: &CaptureQuery,
        page: u32,
        use_resume_key: bool,
    ) -> Result<Vec<CdxRecord>, ArchiveError>;
}

/// Build a CDX request URL following the provider grammar.
pub fn build_cdx_url(
    base: &str,
    query: &CaptureQuery,
    page: Option<u32>,
    use_resume_key: bool,
    show_num_pages: bool,
) -> String {
    let (query_url, match_type) = match (&query.match_type, &query.url_path) {
        (MatchType::Prefix, Some(path)) => (path.as_str(), "prefix"),
        (match_type, _) => (query.domain.as_str(), match_type.as_str()),
    };

    let mimetype_filter = if query.include_attachments {
        "mimetype:text/html|application/pdf"
    } else {
        "mimetype:text/html"
    };

    let mut url = format!(
        "{base}?url={query_url}&from={}&to={}&output=json&collapse=digest&matchType={match_type}\
         &fl=timestamp,original,mimetype,statuscode,digest,length\
         &filter=statuscode:200&filter={mimetype_filter}",
        query.from_date, query.to_date
    );

    if query.min_size > 0 && query.max_size > 0 {
        url.push_str(&format!("&filter=length:[{} TO {}]", query.min_size, query.max_size));
    } else if query.min_size > 0 {
        url.push_str(&format!("&filter=length:{}-", query.min_size));
    }

    url.push_str(&format!("&pageSize={}", query.page_size));
    if let Some(page) = page {
        url.push_str(&format!("&page={page}"));
    }
    if use_resume_key {
        url.push_str("&resumeKey=");
    }
    if show_num_pages {
        url.push_str("&showNumPages=true");
    }

    url
}

/// Parse a CDX JSON body (array of rows, optional header row) into records.
/// Malformed rows are skipped, not fatal.
pub fn parse_cdx_json(body: &str) -> Vec<CdxRecord> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let rows: Vec<Vec<String>> = match serde_json::from_str(trimmed) {
        Ok(rows) => rows,
        Err(err) => {
            warn!(error = %err, "failed to parse CDX JSON body");
            return Vec::new();
        }
    };

    let data_rows = match rows.first() {
        Some(first) if first.first().map(String::as_str) == Some("timestamp") => &rows[1..],
        _ => &rows[..],
    };

    data_rows
        .iter()
        .filter(|row| row.len() >= 6)
        .filter_map(|row| {
            let status_code = row[3].parse::<u16>().ok()?;
            Some(CdxRecord {
                timestamp: row[0].clone(),
                original_url: row[1].clone(),
                mime_type: row[2].clone(),
                status_code,
                digest: row[4].clone(),
                length: row[5].parse::<u64>().ok(),
            })
        })
        .collect()
}

/// Parse a `showNumPages` probe body: a bare integer, or a non-empty JSON
/// array (data present implies at least one page).
pub fn parse_num_pages(body: &str) -> u64 {
    let trimmed = body.trim();
    if let Ok(count) = trimmed.parse::<u64>() {
        return count;
    }
    if trimmed.starts_with('[') {
        return 1;
    }
    let snippet: String = trimmed.chars().take(80).collect();
    warn!(body = %snippet, "unparseable page-count probe, assuming one page");
    1
}

/// Paged CDX client over HTTP, with breaker protection, bounded retries and
/// `Retry-After` handling. Proxied strategies inject their own
/// `reqwest::Client`; everything else is shared.
pub struct CdxHttpClient {
    client: reqwest::Client,
    base_url: String,
    source_name: &'static str,
    breaker: Arc<CircuitBreaker>,
    max_retries: u32,
}

impl CdxHttpClient {
    pub fn new(
        base_url: impl Into<String>,
        source_name: &'static str,
        breaker: Arc<CircuitBreaker>,
        config: &ArchiveSourceConfig,
    ) -> Result<Self, ArchiveError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .gzip(true)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| ArchiveError::Api(e.to_string()))?;
        Ok(Self::with_client(client, base_url, source_name, breaker, config.max_retries))
    }

    /// Construct around a pre-built client (used by the proxy variants).
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        source_name: &'static str,
        breaker: Arc<CircuitBreaker>,
        max_retries: u32,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            source_name,
            breaker,
            max_retries,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    async fn request_once(&self, url: &str) -> Result<String, ArchiveError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(ArchiveError::from_reqwest)?;

        let status = response.status().as_u16();
        match status {
            429 => {
                let retry_after_secs = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                Err(ArchiveError::RateLimit { retry_after_secs })
            }
            401 | 403 | 407 => Err(ArchiveError::Auth(format!("HTTP {status}"))),
            s if s >= 500 => Err(ArchiveError::Server {
                status: s,
                message: "server error".into(),
            }),
            s if s >= 400 => Err(ArchiveError::Server {
                status: s,
                message: response.text().await.unwrap_or_default(),
            }),
            _ => response.text().await.map_err(ArchiveError::from_reqwest),
        }
    }

    /// Breaker-guarded GET with bounded retries. Rate limits honor
    /// `Retry-After`; auth and 4xx failures surface immediately.
    pub async fn request(&self, url: &str) -> Result<String, ArchiveError> {
        let mut last_error = None;
        for attempt in 0..self.max_retries.max(1) {
            if attempt > 0 {
                let delay = match &last_error {
                    Some(ArchiveError::RateLimit {
                        retry_after_secs: Some(secs),
                    }) => (*secs).min(60),
                    _ => (5u64 << (attempt - 1)).min(60),
                };
                debug!(source = self.source_name, attempt, delay_secs = delay, "retrying CDX request");
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let result = guarded_call(&self.breaker, || self.request_once(url)).await;
            match result {
                Ok(body) => return Ok(body),
                Err(GuardedError::Rejected(_)) => {
                    return Err(ArchiveError::CircuitOpen {
                        source_name: self.source_name,
                    })
                }
                Err(GuardedError::Inner(err)) => {
                    let retriable = matches!(
                        err,
                        ArchiveError::Connection(_)
                            | ArchiveError::Timeout(_)
                            | ArchiveError::RateLimit { .. }
                            | ArchiveError::Server { status: 500..=599, .. }
                    );
                    if !retriable {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ArchiveError::Api("request loop exhausted".into())))
    }
}

#[async_trait]
impl PagedCdxClient for CdxHttpClient {
    async fn page_count(&self, query: &CaptureQuery) -> Result<u64, ArchiveError> {
        let url = build_cdx_url(&self.base_url, query, None, false, true);
        let body = self.request(&url).await?;
        Ok(parse_num_pages(&body))
    }

    async fn fetch_page(
        &self,
        query: &CaptureQuery,
        page: u32,
        use_resume_key: bool,
    ) -> Result<Vec<CdxRecord>, ArchiveError> {
        let url = build_cdx_url(&self.base_url, query, Some(page), use_resume_key, false);
        let body = self.request(&url).await?;
        let records = parse_cdx_json(&body)
            .into_iter()
            .filter(|r| !filters::is_static_asset(&r.original_url))
            .collect();
        Ok(records)
    }
}
