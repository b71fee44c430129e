//! Archive discovery for the ChronoScrape pipeline.
//!
//! Five source strategies (Wayback Machine, Common Crawl over its index API,
//! the same through a residential or generic proxy, direct index-segment
//! processing, and an Internet Archive fallback) behind one capability
//! trait, an ordered fallback router with per-source circuit breakers and
//! metrics, and a parallel paginator with the content-filter pipeline.

pub mod cdx;
pub mod config;
pub mod error;
pub mod filters;
pub mod metrics;
pub mod paginator;
pub mod router;
pub mod sources;

pub use cdx::{CaptureQuery, CdxHttpClient, PagedCdxClient, QueryStats};
pub use config::{ArchiveSourceConfig, FallbackStrategy, ProxyEndpoint, RoutingConfig, SmartproxyConfig};
pub use error::{ArchiveError, AttemptRecord};
pub use metrics::{RouterHealth, SourceMetrics, SourceMetricsSnapshot};
pub use paginator::{OptimalSettings, PaginatorConfig, ParallelPaginator};
pub use router::{ArchiveRouter, SourceSetup, UnifiedStats};
pub use sources::{
    ArchiveSourceStrategy, CommonCrawl, CommonCrawlDirect, CommonCrawlProxy,
    CommonCrawlSmartproxy, InternetArchive, WaybackMachine,
};
