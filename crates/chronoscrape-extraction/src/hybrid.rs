//! Hybrid extraction routing.
//!
//! High-value captures (institutional TLDs, large bodies, research-shaped
//! URL paths, PDFs) go to the structured extraction service under a bounded
//! concurrency slot; everything else goes through the DOM extractor. A
//! failing or empty structured pass falls back to the DOM path when enabled.

use crate::error::ExtractionError;
use crate::html::HtmlExtractor;
use crate::quality::quality_score;
use crate::structured::StructuredExtractor;
use chronoscrape_fetch::ContentFetcher;
use chronoscrape_types::{CdxRecord, ExtractedContent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// URL path fragments that signal editorial value.
const HIGH_VALUE_PATH_PATTERNS: &[&str] = &[
    "/research/",
    "/report/",
    "/paper/",
    "/publication/",
    "/document/",
    "/study/",
    "/analysis/",
    "/whitepaper/",
    "/press-release/",
    "/news/",
    "/article/",
    "/blog/",
];

/// Hybrid extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HybridConfig {
    pub enabled: bool,
    pub structured_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    pub fallback_enabled: bool,
    /// Advertised capture length that flags a capture as high-value.
    pub min_content_length: u64,
    pub high_value_domains: Vec<String>,
    pub important_keywords: Vec<String>,
    pub quality_boost_tlds: Vec<String>,
    /// Playback host for capture bodies. Overridden in tests.
    pub archive_host: String,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            structured_url: "http://localhost:3002".to_string(),
            api_key: String::new(),
            timeout_secs: 30,
            max_concurrent: 5,
            fallback_enabled: true,
            min_content_length: 1000,
            high_value_domains: ["gov", "edu", "org", "mil"]
                .map(String::from)
                .to_vec(),
            important_keywords: ["research", "report", "analysis", "study", "whitepaper"]
                .map(String::from)
                .to_vec(),
            quality_boost_tlds: [".gov", ".edu", ".org", ".mil", ".ac."]
                .map(String::from)
                .to_vec(),
            archive_host: "https://web.archive.org".to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct HybridMetrics {
    hybrid_requests: u64,
    dom_requests: u64,
    hybrid_successes: u64,
    hybrid_failures: u64,
    fallback_uses: u64,
    total_processing_secs: f64,
    quality_scores: Vec<f64>,
}

/// Summary of the extractor's running counters.
#[derive(Debug, Clone, Serialize)]
pub struct HybridMetricsSnapshot {
    pub total_requests: u64,
    pub hybrid_requests: u64,
    pub dom_requests: u64,
    pub hybrid_success_rate: f64,
    pub fallback_usage_rate: f64,
    pub average_quality_score: f64,
    pub average_processing_secs: f64,
}

pub struct HybridExtractor {
    config: HybridConfig,
    fetcher: ContentFetcher,
    html: HtmlExtractor,
    structured: Option<StructuredExtractor>,
    slots: Arc<Semaphore>,
    metrics: Mutex<HybridMetrics>,
}

impl HybridExtractor {
    pub fn new(config: HybridConfig, fetcher: ContentFetcher) -> Result<Self, ExtractionError> {
        let structured = if config.enabled && !config.structured_url.is_empty() {
            Some(StructuredExtractor::new(
                &config.structured_url,
                &config.api_key,
                config.timeout_secs,
            )?)
        } else {
            None
        };
        let slots = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Ok(Self {
            config,
            fetcher,
            html: HtmlExtractor::new(),
            structured,
            slots,
            metrics: Mutex::new(HybridMetrics::default()),
        })
    }

    fn playback_url(&self, record: &CdxRecord) -> String {
        format!(
            "{}/web/{}/{}",
            self.config.archive_host, record.timestamp, record.original_url
        )
    }

    fn raw_content_url(&self, record: &CdxRecord) -> String {
        format!(
            "{}/web/{}if_/{}",
            self.config.archive_host, record.timestamp, record.original_url
        )
    }

    /// Routing decision: does this capture deserve the structured service?
    pub fn should_use_structured(&self, record: &CdxRecord) -> bool {
        let url_lower = record.original_url.to_ascii_lowercase();
        let parsed = url::Url::parse(&url_lower);
        let (domain, path) = match &parsed {
            Ok(parsed) => (parsed.host_str().unwrap_or(""), parsed.path()),
            Err(_) => ("", url_lower.as_str()),
        };

        if self.config.quality_boost_tlds.iter().any(|tld| domain.contains(tld.as_str())) {
            return true;
        }
        if self.config.high_value_domains.iter().any(|hint| domain.contains(hint.as_str())) {
            return true;
        }
        if record.content_length_bytes() >= self.config.min_content_length {
            return true;
        }
        if self.config.important_keywords.iter().any(|kw| path.contains(kw.as_str())) {
            return true;
        }
        if HIGH_VALUE_PATH_PATTERNS.iter().any(|p| path.contains(p)) {
            return true;
        }
        record.is_pdf()
    }

    /// Extract one capture, routing per value signals, with fallback and
    /// quality accounting.
    pub async fn extract(&self, record: &CdxRecord) -> Result<ExtractedContent, ExtractionError> {
        let started = Instant::now();

        let use_structured = self.structured.is_some() && self.should_use_structured(record);
        let mut result = if use_structured {
            self.metrics.lock().hybrid_requests += 1;
            let outcome = {
                let structured = self.structured.as_ref().expect("checked above");
                let _slot = self.slots.acquire().await.expect("semaphore never closed");
                structured.extract(&self.playback_url(record)).await
            };

            match outcome {
                Ok(content) if content.has_text() => {
                    self.metrics.lock().hybrid_successes += 1;
                    content
                }
                Ok(empty) => {
                    self.metrics.lock().hybrid_failures += 1;
                    if self.config.fallback_enabled {
                        warn!(url = %record.original_url, "structured pass returned no text, falling back");
                        self.fallback_extract(record).await?
                    } else {
                        empty
                    }
                }
                Err(err) => {
                    self.metrics.lock().hybrid_failures += 1;
                    if self.config.fallback_enabled {
                        warn!(url = %record.original_url, error = %err, "structured pass failed, falling back");
                        self.fallback_extract(record).await?
                    } else {
                        return Err(err);
                    }
                }
            }
        } else {
            self.metrics.lock().dom_requests += 1;
            self.extract_dom(record).await?
        };

        result.extraction_secs = started.elapsed().as_secs_f64();
        let score = quality_score(&result);
        {
            let mut metrics = self.metrics.lock();
            metrics.total_processing_secs += result.extraction_secs;
            metrics.quality_scores.push(score);
            if metrics.quality_scores.len() > 1000 {
                metrics.quality_scores.remove(0);
            }
        }
        debug!(
            url = %record.original_url,
            method = %result.extraction_method,
            words = result.word_count,
            score,
            "extraction finished"
        );
        Ok(result)
    }

    async fn fallback_extract(&self, record: &CdxRecord) -> Result<ExtractedContent, ExtractionError> {
        let mut content = self.extract_dom(record).await?;
        content.extraction_method = "hybrid_fallback".to_string();
        self.metrics.lock().fallback_uses += 1;
        Ok(content)
    }

    async fn extract_dom(&self, record: &CdxRecord) -> Result<ExtractedContent, ExtractionError> {
        let (bytes, content_type) = self.fetcher.fetch(&self.raw_content_url(record)).await?;

        if record.is_pdf() || content_type.contains("pdf") {
            let pdf = chronoscrape_pdf::extract_text(&bytes)?;
            let title = pdf.title.unwrap_or_else(|| "No Title".to_string());
            // PDF text is already plain; it doubles as the markdown view.
            return Ok(ExtractedContent::new(title, pdf.text.clone(), pdf.text, "pdf"));
        }

        if record.is_html() || content_type.contains("html") {
            let mut content = self.html.extract(&bytes)?;
            content.extraction_method = "hybrid_beautifulsoup".to_string();
            return Ok(content);
        }

        Err(ExtractionError::UnsupportedContentType(
            record.mime_type.clone(),
        ))
    }

    pub fn metrics_snapshot(&self) -> HybridMetricsSnapshot {
        let metrics = self.metrics.lock();
        let total = metrics.hybrid_requests + metrics.dom_requests;
        let avg_quality = if metrics.quality_scores.is_empty() {
            0.0
        } else {
            metrics.quality_scores.iter().sum::<f64>() / metrics.quality_scores.len() as f64
        };
        HybridMetricsSnapshot {
            total_requests: total,
            hybrid_requests: metrics.hybrid_requests,
            dom_requests: metrics.dom_requests,
            hybrid_success_rate: percentage(metrics.hybrid_successes, metrics.hybrid_requests),
            fallback_usage_rate: percentage(metrics.fallback_uses, metrics.hybrid_requests),
            average_quality_score: avg_quality,
            average_processing_secs: if total == 0 {
                0.0
            } else {
                metrics.total_processing_secs / total as f64
            },
        }
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
