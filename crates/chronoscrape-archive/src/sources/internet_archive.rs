//! Internet Archive CDX fallback. Same protocol as the Wayback strategy
//! against the archive.org endpoint; used only as the last link of the
//! fallback chain.

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

const IA_CDX_URL: &str = "https://web.archive.org/cdx/search/cdx";

pub struct InternetArchive {
    http: CdxHttpClient,
    config: ArchiveSourceConfig,
    paginator: Arc<ParallelPaginator>,
}

impl InternetArchive {
    pub fn new(
        config: ArchiveSourceConfig,
        breaker: Arc<CircuitBreaker>,
        paginator: Arc<ParallelPaginator>,
    ) -> Result<Self, ArchiveError> {
        Self::with_base_url(IA_CDX_URL, config, breaker, paginator)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        config: ArchiveSourceConfig,
        breaker: Arc<CircuitBreaker>,
        paginator: Arc<ParallelPaginator>,
    ) -> Result<Self, ArchiveError> {
        let http = CdxHttpClient::new(base_url, "internet_archive", breaker, &config)?;
        Ok(Self {
            http,
            config,
            paginator,
        })
    }
}

#[async_trait]
impl ArchiveSourceStrategy for InternetArchive {
    fn name(&self) -> &'static str {
        "internet_archive"
    }

    fn error_label(&self) -> &'static str {
        "ia"
    }

    fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.http.breaker()
    }

    async fn query_captures(
        &self,
        query: &CaptureQuery,
    ) -> Result<(Vec<CdxRecord>, QueryStats), ArchiveError> {
        let effective = apply_source_config(query, &self.config);
        info!(domain = %effective.domain, "querying internet archive fallback");
        self.paginator.fetch_filtered(&self.http, &effective).await
    }
}
