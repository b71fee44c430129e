//! Wayback Machine CDX strategy.

use super::{apply_source_config, ArchiveSourceStrategy};
use crate::cdx::{CaptureQuery, CdxHttpClient, QueryStats};
use crate::config::ArchiveSourceConfig;
use crate::error::ArchiveError;
use crate::paginator::ParallelPaginator;
use async_trait::async_trait;
use chronoscrape_reliability::CircuitBreaker;
use chronoscrape_types::CdxRecord;
use std::sync::Arc;
use tracing::info;

const WAYBACK_CDX_URL: &str = "https://web.archive.org/cdx/search/cdx";

/// Paginated Wayback CDX API over HTTPS. 14-digit UTC timestamps, honors
/// `Retry-After` on 429, accepts all four match types.
pub struct WaybackMachine {
    http: CdxHttpClient,
    config: ArchiveSourceConfig,
    paginator: Arc<ParallelPaginator>,
}

impl WaybackMachine {
    pub fn new(
        config: ArchiveSourceConfig,
        breaker: Arc<CircuitBreaker>,
        paginator: Arc<ParallelPaginator>,
    ) -> Result<Self, ArchiveError> {
        Self::with_base_url(WAYBACK_CDX_URL, config, breaker, paginator)
    }

    /// Point the strategy at a different CDX endpoint (tests, mirrors).
    pub fn with_base_url(
        base_url: impl Into<String>,
        config: ArchiveSourceConfig,
        breaker: Arc<CircuitBreaker>,
        paginator: Arc<ParallelPaginator>,
    ) -> Result<Self, ArchiveError> {
        let http = CdxHttpClient::new(base_url, "wayback_machine", breaker, &config)?;
        Ok(Self {
            http,
            config,
            paginator,
        })
    }
}

#[async_trait]
impl ArchiveSourceStrategy for WaybackMachine {
    fn name(&self) -> &'static str {
        "wayback_machine"
    }

    fn error_label(&self) -> &'static str {
        "wayback"
    }

    fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.http.breaker()
    }

    async fn query_captures(
        &self,
        query: &CaptureQuery,
    ) -> Result<(Vec<CdxRecord>, QueryStats), ArchiveError> {
        let effective = apply_source_config(query, &self.config);
        info!(domain = %effective.domain, from = %effective.from_date, to = %effective.to_date,
              "querying wayback machine");
        self.paginator.fetch_filtered(&self.http, &effective).await
    }
}
