//! HTTP-level strategy behavior: rate-limit handling and breaker safety.

use chronoscrape_archive::{
    ArchiveError, ArchiveRouter, ArchiveSourceConfig, ArchiveSourceStrategy, CaptureQuery,
    PaginatorConfig, ParallelPaginator, RoutingConfig, WaybackMachine,
};
use chronoscrape_reliability::{CircuitBreaker, CircuitBreakerConfig, RealClock, State};
use chronoscrape_types::{ArchiveSource, ErrorKind};
use std::sync::Arc;
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

fn query() -> CaptureQuery {
    CaptureQuery::new("example.com", "20200101", "20200131")
}

#[tokio::test]
async fn rate_limit_honors_retry_after_and_recovers() {
    let server = MockServer::start().await;
    // First request is rate limited with an explicit Retry-After.
    Mock::given(method("GET"))
        .and(path("/cdx"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdx"))
        .and(query_param("showNumPages", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_string("1"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cdx"))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"[["20200115120000","https://example.com/articles/winter-report-analysis","text/html","200","D1","2048"]]"#,
        ))
        .mount(&server)
        .await;

    let wayback = WaybackMachine::with_base_url(
        format!("{}/cdx", server.uri()),
        ArchiveSourceConfig {
            max_retries: 3,
            timeout_secs: 10,
            ..ArchiveSourceConfig::default()
        },
        breaker(),
        paginator(),
    )
    .unwrap();

    let (records, stats) = wayback.query_captures(&query()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].digest, "D1");
    assert_eq!(stats.final_count, 1);
    // The 429 plus the successful probe and page fetch.
    assert!(server.received_requests().await.unwrap().len() >= 3);
}

#[tokio::test]
async fn open_breaker_makes_zero_provider_calls() {
    let server = MockServer::start().await;

    let cb = CircuitBreaker::new(
        CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        },
        Arc::new(RealClock),
    );
    cb.on_failure();
    assert_eq!(cb.state(), State::Open);

    let wayback = WaybackMachine::with_base_url(
        format!("{}/cdx", server.uri()),
        ArchiveSourceConfig::default(),
        Arc::clone(&cb),
        paginator(),
    )
    .unwrap();

    let err = wayback.query_captures(&query()).await.unwrap_err();
    assert!(matches!(err, ArchiveError::CircuitOpen { .. }));
    assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn hybrid_order_respects_source_priority() {
    // Common Crawl carries the higher priority; it must be attempted first.
    let wayback_server = MockServer::start().await;
    let cc_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/CC-TEST-index"))
        .and(query_param("showNumPages", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_string("1"))
        .mount(&cc_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/CC-TEST-index"))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"[["20200115120000","https://example.com/articles/winter-report-analysis","text/html","200","D1","2048"]]"#,
        ))
        .mount(&cc_server)
        .await;

    let config = RoutingConfig {
        wayback: ArchiveSourceConfig {
            priority: 2,
            ..ArchiveSourceConfig::default()
        },
        common_crawl: ArchiveSourceConfig {
            priority: 1,
            ..ArchiveSourceConfig::default()
        },
        enable_smartproxy_fallback: false,
        enable_proxy_fallback: false,
        enable_direct_fallback: false,
        enable_ia_fallback: false,
        ..RoutingConfig::default()
    };
    let pag = paginator();
    let router = ArchiveRouter::new(
        config.clone(),
        vec![
            Arc::new(
                WaybackMachine::with_base_url(
                    format!("{}/cdx", wayback_server.uri()),
                    config.wayback.clone(),
                    breaker(),
                    pag.clone(),
                )
                .unwrap(),
            ),
            Arc::new(
                chronoscrape_archive::CommonCrawl::with_host(
                    &cc_server.uri(),
                    "CC-TEST",
                    config.common_crawl.clone(),
                    breaker(),
                    pag,
                )
                .unwrap(),
            ),
        ],
    );

    let (records, stats) = router
        .query_unified(ArchiveSource::Hybrid, true, &query())
        .await
        .unwrap();

    assert_eq!(stats.primary_source, "common_crawl");
    assert_eq!(stats.successful_source, "common_crawl");
    assert!(!stats.fallback_used);
    assert_eq!(records.len(), 1);
    assert!(wayback_server.received_requests().await.unwrap().is_empty());

    let snapshots = router.metrics_snapshot();
    let cc = snapshots
        .iter()
        .find(|s| s.source_name == "common_crawl")
        .unwrap();
    assert_eq!(cc.successful_queries, 1);
    assert_eq!(router.query_history().len(), 1);

    router.reset_metrics();
    assert!(router.query_history().is_empty());
}
