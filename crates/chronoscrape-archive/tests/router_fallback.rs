//! End-to-end router scenarios against stubbed CDX endpoints.

use async_trait::async_trait;
use chronoscrape_archive::{
    ArchiveError, ArchiveRouter, ArchiveSourceConfig, ArchiveSourceStrategy, CaptureQuery,
    CommonCrawl, FallbackStrategy, ParallelPaginator, PaginatorConfig, QueryStats, RoutingConfig,
    WaybackMachine,
};
use chronoscrape_reliability::{CircuitBreaker, CircuitBreakerConfig, RealClock};
use chronoscrape_types::{ArchiveSource, CdxRecord};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn breaker() -> Arc<CircuitBreaker> {
    CircuitBreaker::new(CircuitBreakerConfig::default(), Arc::new(RealClock))
}

fn paginator() -> Arc<ParallelPaginator> {
    Arc::new(ParallelPaginator::new(PaginatorConfig {
        inter_batch_delay_ms: 0,
        ..PaginatorConfig::default()
    }))
}

fn source_config() -> ArchiveSourceConfig {
    ArchiveSourceConfig {
        max_retries: 1,
        timeout_secs: 30,
        ..ArchiveSourceConfig::default()
    }
}

fn query() -> CaptureQuery {
    CaptureQuery::new("example.com", "20200101", "20200131")
}

fn cdx_page_body(rows: &[(&str, &str, u64)]) -> String {
    let mut body = String::from(
        r#"[["timestamp","original","mimetype","statuscode","digest","length"]"#,
    );
    for (url, digest, length) in rows {
        body.push_str(&format!(
            r#",["20200115120000","{url}","text/html","200","{digest}","{length}"]"#
        ));
    }
    body.push(']');
    body
}

async fn mount_cdx(server: &MockServer, endpoint_path: &str, rows: &[(&str, &str, u64)]) {
    Mock::given(method("GET"))
        .and(path(endpoint_path))
        .and(query_param("showNumPages", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_string("1"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(endpoint_path))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(cdx_page_body(rows)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn hybrid_query_uses_wayback_without_fallback() {
    let wayback_server = MockServer::start().await;
    mount_cdx(
        &wayback_server,
        "/cdx",
        &[
            ("https://example.com/articles/winter-report-analysis", "D1", 2048),
            ("https://example.com/articles/spring-report-details", "D2", 1536),
        ],
    )
    .await;
    let cc_server = MockServer::start().await;

    let config = RoutingConfig {
        enable_smartproxy_fallback: false,
        enable_proxy_fallback: false,
        enable_direct_fallback: false,
        enable_ia_fallback: false,
        ..RoutingConfig::default()
    };
    let pag = paginator();
    let router = ArchiveRouter::new(
        config,
        vec![
            Arc::new(
                WaybackMachine::with_base_url(
                    format!("{}/cdx", wayback_server.uri()),
                    source_config(),
                    breaker(),
                    pag.clone(),
                )
                .unwrap(),
            ),
            Arc::new(
                CommonCrawl::with_host(&cc_server.uri(), "CC-TEST", source_config(), breaker(), pag)
                    .unwrap(),
            ),
        ],
    );

    let (records, stats) = router
        .query_unified(ArchiveSource::Hybrid, true, &query())
        .await
        .unwrap();

    assert_eq!(stats.successful_source, "wayback_machine");
    assert!(!stats.fallback_used);
    assert_eq!(stats.attempts.len(), 1);
    let digests: Vec<_> = records.iter().map(|r| r.digest.as_str()).collect();
    assert_eq!(digests, ["D1", "D2"]);
    // Common Crawl was never consulted.
    assert!(cc_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn wayback_timeout_falls_back_to_common_crawl() {
    let wayback_server = MockServer::start().await;
    // The probe hangs past the per-strategy deadline.
    Mock::given(method("GET"))
        .and(path("/cdx"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("1")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&wayback_server)
        .await;

    let cc_server = MockServer::start().await;
    mount_cdx(
        &cc_server,
        "/CC-TEST-index",
        &[("https://example.com/articles/autumn-report-details", "D3", 3000)],
    )
    .await;

    let config = RoutingConfig {
        per_strategy_timeout_secs: 1.0,
        fallback_delay_secs: 0.05,
        enable_smartproxy_fallback: false,
        enable_proxy_fallback: false,
        enable_direct_fallback: false,
        enable_ia_fallback: false,
        ..RoutingConfig::default()
    };
    let pag = paginator();
    let wayback = Arc::new(
        WaybackMachine::with_base_url(
            format!("{}/cdx", wayback_server.uri()),
            source_config(),
            breaker(),
            pag.clone(),
        )
        .unwrap(),
    );
    let wayback_breaker = Arc::clone(wayback.breaker());
    let router = ArchiveRouter::new(
        config,
        vec![
            wayback,
            Arc::new(
                CommonCrawl::with_host(&cc_server.uri(), "CC-TEST", source_config(), breaker(), pag)
                    .unwrap(),
            ),
        ],
    );

    let (records, stats) = router
        .query_unified(ArchiveSource::Hybrid, true, &query())
        .await
        .unwrap();

    assert_eq!(stats.attempts.len(), 2);
    assert_eq!(stats.attempts[0].source, "wayback_machine");
    assert_eq!(
        stats.attempts[0].error_type.as_deref(),
        Some("strategy_timeout")
    );
    assert_eq!(stats.successful_source, "common_crawl");
    assert!(stats.fallback_used);
    let digests: Vec<_> = records.iter().map(|r| r.digest.as_str()).collect();
    assert_eq!(digests, ["D3"]);
    // The cancelled attempt still counts against the wayback breaker.
    assert!(wayback_breaker.status().failure_ratio > 0.0);
}

/// Scripted strategy for chain-order tests where real transports would get
/// in the way (proxy handshakes, segment downloads).
struct ScriptedSource {
    name: &'static str,
    label: &'static str,
    breaker: Arc<CircuitBreaker>,
    outcomes: Mutex<VecDeque<Result<Vec<CdxRecord>, ArchiveError>>>,
}

impl ScriptedSource {
    fn new(
        name: &'static str,
        label: &'static str,
        outcomes: Vec<Result<Vec<CdxRecord>, ArchiveError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            label,
            breaker: breaker(),
            outcomes: Mutex::new(outcomes.into()),
        })
    }
}

#[async_trait]
impl ArchiveSourceStrategy for ScriptedSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn error_label(&self) -> &'static str {
        self.label
    }

    fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    async fn query_captures(
        &self,
        _query: &CaptureQuery,
    ) -> Result<(Vec<CdxRecord>, QueryStats), ArchiveError> {
        let outcome = self
            .outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ArchiveError::Api("script exhausted".into())));
        outcome.map(|records| {
            let stats = QueryStats {
                final_count: records.len() as u64,
                total_records: records.len() as u64,
                ..QueryStats::default()
            };
            (records, stats)
        })
    }
}

fn capture(digest: &str) -> CdxRecord {
    CdxRecord {
        timestamp: "20200115120000".into(),
        original_url: "https://example.com/articles/winter-report-analysis".into(),
        mime_type: "text/html".into(),
        status_code: 200,
        digest: digest.into(),
        length: Some(2048),
    }
}

#[tokio::test]
async fn auth_errors_force_fallback_through_the_full_chain() {
    let config = RoutingConfig {
        fallback_strategy: FallbackStrategy::Immediate,
        fallback_delay_secs: 0.01,
        exponential_backoff: false,
        enable_smartproxy_fallback: true,
        enable_proxy_fallback: true,
        enable_direct_fallback: true,
        enable_ia_fallback: true,
        ..RoutingConfig::default()
    };

    let common_crawl = ScriptedSource::new(
        "common_crawl",
        "common_crawl",
        vec![Err(ArchiveError::RateLimit {
            retry_after_secs: Some(1),
        })],
    );
    let smartproxy = ScriptedSource::new(
        "smartproxy_cc",
        "smartproxy",
        vec![Err(ArchiveError::Auth("HTTP 407".into()))],
    );
    let proxy = ScriptedSource::new(
        "proxy_cc",
        "proxy",
        vec![Err(ArchiveError::Auth("HTTP 407".into()))],
    );
    let direct = ScriptedSource::new(
        "direct_cc",
        "direct",
        vec![Err(ArchiveError::Connection("reset by peer".into()))],
    );
    let ia = ScriptedSource::new("internet_archive", "ia", vec![Ok(vec![capture("D4")])]);

    let auth_error = ArchiveError::Auth("HTTP 407".into());
    assert!(!smartproxy.is_retriable(&auth_error));

    let router = ArchiveRouter::new(
        config,
        vec![common_crawl, smartproxy, proxy, direct, ia],
    );

    let (records, stats) = router
        .query_unified(ArchiveSource::CommonCrawl, true, &query())
        .await
        .unwrap();

    let digests: Vec<_> = records.iter().map(|r| r.digest.as_str()).collect();
    assert_eq!(digests, ["D4"]);
    assert_eq!(stats.attempts.len(), 5);
    assert_eq!(
        stats.attempts[1].error_type.as_deref(),
        Some("smartproxy_auth_error")
    );
    assert_eq!(stats.successful_source, "internet_archive");
    assert!(stats.fallback_used);
}

#[tokio::test]
async fn all_sources_failing_surfaces_the_attempt_log() {
    let config = RoutingConfig {
        fallback_strategy: FallbackStrategy::Immediate,
        fallback_delay_secs: 0.01,
        exponential_backoff: false,
        enable_smartproxy_fallback: false,
        enable_proxy_fallback: false,
        enable_direct_fallback: false,
        enable_ia_fallback: false,
        ..RoutingConfig::default()
    };
    let wayback = ScriptedSource::new(
        "wayback_machine",
        "wayback",
        vec![Err(ArchiveError::Server {
            status: 503,
            message: "unavailable".into(),
        })],
    );
    let cc = ScriptedSource::new(
        "common_crawl",
        "common_crawl",
        vec![Err(ArchiveError::Timeout("read".into()))],
    );
    let router = ArchiveRouter::new(config, vec![wayback, cc]);

    let err = router
        .query_unified(ArchiveSource::Hybrid, true, &query())
        .await
        .unwrap_err();

    match err {
        ArchiveError::AllSourcesFailed {
            domain,
            attempt_count,
            attempts,
        } => {
            assert_eq!(domain, "example.com");
            assert_eq!(attempt_count, 2);
            assert_eq!(
                attempts[0].error_type.as_deref(),
                Some("wayback_server_error")
            );
            assert_eq!(
                attempts[1].error_type.as_deref(),
                Some("common_crawl_timeout")
            );
        }
        other => panic!("expected AllSourcesFailed, got {other}"),
    }
}
