//! Archive source strategies.
//!
//! Each provider is a concrete struct behind [`ArchiveSourceStrategy`]; the
//! router holds them by capability, never by concrete type. Every strategy
//! owns its circuit breaker and HTTP client, classifies its own errors, and
//! pre-filters static-asset captures at the boundary.

mod common_crawl;
mod direct;
mod internet_archive;
mod wayback;

pub use common_crawl::{CommonCrawl, CommonCrawlProxy, CommonCrawlSmartproxy};
pub use direct::CommonCrawlDirect;
pub use internet_archive::InternetArchive;
pub use wayback::WaybackMachine;

use crate::cdx::{CaptureQuery, QueryStats};
use crate::error::ArchiveError;
use async_trait::async_trait;
use chronoscrape_reliability::CircuitBreaker;
use chronoscrape_types::{CdxRecord, ErrorKind};
use std::sync::Arc;

/// Capability set every archive source presents to the router.
#[async_trait]
pub trait ArchiveSourceStrategy: Send + Sync {
    /// Stable source name used in stats and attempt logs.
    fn name(&self) -> &'static str;

    /// Short prefix for classified error labels (`smartproxy_auth_error`).
    fn error_label(&self) -> &'static str;

    fn breaker(&self) -> &Arc<CircuitBreaker>;

    /// Query captures for the domain window. All I/O runs under the
    /// strategy's circuit breaker.
    async fn query_captures(
        &self,
        query: &CaptureQuery,
    ) -> Result<(Vec<CdxRecord>, QueryStats), ArchiveError>;

    /// Whether the error is a transient condition worth retrying on this
    /// source. Authentication failures are never retriable.
    fn is_retriable(&self, err: &ArchiveError) -> bool {
        matches!(
            err.kind(),
            ErrorKind::ConnectionError
                | ErrorKind::Timeout
                | ErrorKind::RateLimit
                | ErrorKind::ServerError
        )
    }

    /// Map an error onto the stable taxonomy.
    fn classify(&self, err: &ArchiveError) -> ErrorKind {
        err.kind()
    }
}

/// Clamp a query to a strategy's own limits.
pub(crate) fn apply_source_config(
    query: &CaptureQuery,
    config: &crate::config::ArchiveSourceConfig,
) -> CaptureQuery {
    let mut effective = query.clone();
    effective.page_size = config.page_size;
    effective.max_pages = match (config.max_pages, query.max_pages) {
        (Some(limit), Some(requested)) => Some(limit.min(requested)),
        (Some(limit), None) => Some(limit),
        (None, requested) => requested,
    };
    effective.include_attachments = query.include_attachments && config.include_attachments;
    effective
}
