//! Common Crawl index API strategies: direct, residential-proxy and
//! rotating-proxy variants. All three speak the same paged CDX protocol
//! against a monthly crawl index; they differ only in how the HTTP client is
//! built and how errors classify.

use super::{apply_source_config, ArchiveSourceStrategy};
use crate::cdx::{CaptureQuery, CdxHttpClient, QueryStats};
use crate::config::{ArchiveSourceConfig, ProxyEndpoint, SmartproxyConfig};
use crate::error::ArchiveError;
use crate::paginator::ParallelPaginator;
use async_trait::async_trait;
use chronoscrape_reliability::CircuitBreaker;
use chronoscrape_types::{CdxRecord, ErrorKind};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const CC_INDEX_HOST: &str = "https://index.commoncrawl.org";

/// Default monthly crawl to query. Callers override per deployment.
pub const DEFAULT_CRAWL_ID: &str = "CC-MAIN-2024-33";

fn crawl_index_url(host: &str, crawl_id: &str) -> String {
    format!("{host}/{crawl_id}-index")
}

/// Common Crawl index API without any proxy.
pub struct CommonCrawl {
    http: CdxHttpClient,
    config: ArchiveSourceConfig,
    paginator: Arc<ParallelPaginator>,
}

impl CommonCrawl {
    pub fn new(
        crawl_id: &str,
        config: ArchiveSourceConfig,
        breaker: Arc<CircuitBreaker>,
        paginator: Arc<ParallelPaginator>,
    ) -> Result<Self, ArchiveError> {
        Self::with_host(CC_INDEX_HOST, crawl_id, config, breaker, paginator)
    }

    pub fn with_host(
        host: &str,
        crawl_id: &str,
        config: ArchiveSourceConfig,
        breaker: Arc<CircuitBreaker>,
        paginator: Arc<ParallelPaginator>,
    ) -> Result<Self, ArchiveError> {
        let http = CdxHttpClient::new(
            crawl_index_url(host, crawl_id),
            "common_crawl",
            breaker,
            &config,
        )?;
        Ok(Self {
            http,
            config,
            paginator,
        })
    }
}

#[async_trait]
impl ArchiveSourceStrategy for CommonCrawl {
    fn name(&self) -> &'static str {
        "common_crawl"
    }

    fn error_label(&self) -> &'static str {
        "common_crawl"
    }

    fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.http.breaker()
    }

    async fn query_captures(
        &self,
        query: &CaptureQuery,
    ) -> Result<(Vec<CdxRecord>, QueryStats), ArchiveError> {
        let effective = apply_source_config(query, &self.config);
        info!(domain = %effective.domain, index = self.http.base_url(), "querying common crawl index");
        self.paginator.fetch_filtered(&self.http, &effective).await
    }
}

/// Common Crawl through a residential proxy endpoint with credentials and
/// optional sticky session tokens.
pub struct CommonCrawlSmartproxy {
    http: CdxHttpClient,
    config: ArchiveSourceConfig,
    paginator: Arc<ParallelPaginator>,
}

impl CommonCrawlSmartproxy {
    pub fn new(
        crawl_id: &str,
        proxy: &SmartproxyConfig,
        config: ArchiveSourceConfig,
        breaker: Arc<CircuitBreaker>,
        paginator: Arc<ParallelPaginator>,
    ) -> Result<Self, ArchiveError> {
        Self::with_host(CC_INDEX_HOST, crawl_id, proxy, config, breaker, paginator)
    }

    pub fn with_host(
        host: &str,
        crawl_id: &str,
        proxy: &SmartproxyConfig,
        config: ArchiveSourceConfig,
        breaker: Arc<CircuitBreaker>,
        paginator: Arc<ParallelPaginator>,
    ) -> Result<Self, ArchiveError> {
        let username = if proxy.session_stickiness {
            format!("{}-session-{}", proxy.username, session_token())
        } else {
            proxy.username.clone()
        };
        let proxy_url = format!("http://{}", proxy.endpoint.trim_start_matches("http://"));
        let reqwest_proxy = reqwest::Proxy::all(&proxy_url)
            .map_err(|e| ArchiveError::Api(e.to_string()))?
            .basic_auth(&username, &proxy.password);
        let client = reqwest::Client::builder()
            .proxy(reqwest_proxy)
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ArchiveError::Api(e.to_string()))?;
        debug!(endpoint = %proxy.endpoint, sticky = proxy.session_stickiness, "configured smartproxy session");
        let max_retries = config.max_retries;
        let http = CdxHttpClient::with_client(
            client,
            crawl_index_url(host, crawl_id),
            "smartproxy_cc",
            breaker,
            max_retries,
        );
        Ok(Self {
            http,
            config,
            paginator,
        })
    }
}

fn session_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

#[async_trait]
impl ArchiveSourceStrategy for CommonCrawlSmartproxy {
    fn name(&self) -> &'static str {
        "smartproxy_cc"
    }

    fn error_label(&self) -> &'static str {
        "smartproxy"
    }

    fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.http.breaker()
    }

    async fn query_captures(
        &self,
        query: &CaptureQuery,
    ) -> Result<(Vec<CdxRecord>, QueryStats), ArchiveError> {
        let effective = apply_source_config(query, &self.config);
        info!(domain = %effective.domain, "querying common crawl via smartproxy");
        self.paginator.fetch_filtered(&self.http, &effective).await
    }

    // Proxy auth errors need an operator fix; everything transient retries.
    fn is_retriable(&self, err: &ArchiveError) -> bool {
        !matches!(err.kind(), ErrorKind::AuthError)
            && matches!(
                err.kind(),
                ErrorKind::ConnectionError
                    | ErrorKind::Timeout
                    | ErrorKind::RateLimit
                    | ErrorKind::ServerError
            )
    }
}

/// Common Crawl through a rotating pool of generic proxies. Endpoints are
/// used round-robin, one per query.
pub struct CommonCrawlProxy {
    host: String,
    crawl_id: String,
    proxies: Vec<ProxyEndpoint>,
    next_proxy: AtomicUsize,
    breaker: Arc<CircuitBreaker>,
    config: ArchiveSourceConfig,
    paginator: Arc<ParallelPaginator>,
}

impl CommonCrawlProxy {
    pub fn new(
        crawl_id: &str,
        proxies: Vec<ProxyEndpoint>,
        config: ArchiveSourceConfig,
        breaker: Arc<CircuitBreaker>,
        paginator: Arc<ParallelPaginator>,
    ) -> Self {
        Self::with_host(CC_INDEX_HOST, crawl_id, proxies, config, breaker, paginator)
    }

    pub fn with_host(
        host: &str,
        crawl_id: &str,
        proxies: Vec<ProxyEndpoint>,
        config: ArchiveSourceConfig,
        breaker: Arc<CircuitBreaker>,
        paginator: Arc<ParallelPaginator>,
    ) -> Self {
        Self {
            host: host.to_string(),
            crawl_id: crawl_id.to_string(),
            proxies,
            next_proxy: AtomicUsize::new(0),
            breaker,
            config,
            paginator,
        }
    }

    fn build_client(&self) -> Result<CdxHttpClient, ArchiveError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(self.config.timeout_secs));

        if !self.proxies.is_empty() {
            let index = self.next_proxy.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
            let endpoint = &self.proxies[index];
            let mut proxy = reqwest::Proxy::all(&endpoint.url)
                .map_err(|e| ArchiveError::Api(e.to_string()))?;
            if let (Some(user), Some(pass)) = (&endpoint.username, &endpoint.password) {
                proxy = proxy.basic_auth(user, pass);
            }
            debug!(proxy = %endpoint.url, "rotated to next proxy endpoint");
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ArchiveError::Api(e.to_string()))?;
        Ok(CdxHttpClient::with_client(
            client,
            crawl_index_url(&self.host, &self.crawl_id),
            "proxy_cc",
            Arc::clone(&self.breaker),
            self.config.max_retries,
        ))
    }
}

#[async_trait]
impl ArchiveSourceStrategy for CommonCrawlProxy {
    fn name(&self) -> &'static str {
        "proxy_cc"
    }

    fn error_label(&self) -> &'static str {
        "proxy"
    }

    fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    async fn query_captures(
        &self,
        query: &CaptureQuery,
    ) -> Result<(Vec<CdxRecord>, QueryStats), ArchiveError> {
        let effective = apply_source_config(query, &self.config);
        let http = self.build_client()?;
        info!(domain = %effective.domain, "querying common crawl via proxy pool");
        self.paginator.fetch_filtered(&http, &effective).await
    }

    fn is_retriable(&self, err: &ArchiveError) -> bool {
        !matches!(err.kind(), ErrorKind::AuthError)
            && matches!(
                err.kind(),
                ErrorKind::ConnectionError
                    | ErrorKind::Timeout
                    | ErrorKind::RateLimit
                    | ErrorKind::ServerError
            )
    }
}
