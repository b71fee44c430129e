//! Client for the external high-quality structured extraction service.

use crate::error::ExtractionError;
use chronoscrape_types::ExtractedContent;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
enum StructuredCallError {
    #[error("timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("{0}")]
    Fatal(String),
}

/// HTTP client for the structured extraction service. One POST per capture,
/// bearer-token auth, main-content-only markdown output.
#[derive(Debug, Clone)]
pub struct StructuredExtractor {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl StructuredExtractor {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ExtractionError::Structured(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Extract `url` through the service. Transport hiccups retry up to
    /// three times with short backoff; service-level failures do not.
    pub async fn extract(&self, url: &str) -> Result<ExtractedContent, ExtractionError> {
        let mut last_error = None;
        for attempt in 0..3 {
            if attempt > 0 {
                let delay = (2u64 << attempt).clamp(2, 10);
                warn!(url, attempt, delay_secs = delay, "retrying structured extraction");
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
            match self.call_service(url).await {
                Ok(content) => return Ok(content),
                Err(err @ (StructuredCallError::Timeout | StructuredCallError::Connection(_))) => {
                    last_error = Some(err);
                }
                Err(StructuredCallError::Fatal(message)) => {
                    return Err(ExtractionError::Structured(message))
                }
            }
        }
        Err(ExtractionError::Structured(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".into()),
        ))
    }

    async fn call_service(&self, url: &str) -> Result<ExtractedContent, StructuredCallError> {
        let payload = json!({
            "url": url,
            "formats": ["markdown", "html"],
            "onlyMainContent": true,
            "includeMetadata": true,
        });

        let response = self
            .client
            .post(format!("{}/v0/scrape", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StructuredCallError::Timeout
                } else if e.is_connect() {
                    StructuredCallError::Connection(e.to_string())
                } else {
                    StructuredCallError::Fatal(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(StructuredCallError::Fatal(format!(
                "service returned {status}: {snippet}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StructuredCallError::Fatal(e.to_string()))?;

        if body.get("success").and_then(|v| v.as_bool()) != Some(true) {
            let message = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown service error");
            return Err(StructuredCallError::Fatal(message.to_string()));
        }

        let data = body
            .get("data")
            .ok_or_else(|| StructuredCallError::Fatal("response missing data".into()))?;
        let title = data
            .pointer("/metadata/title")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let text = data.get("content").and_then(|v| v.as_str()).unwrap_or("");
        let markdown = data
            .get("markdown")
            .and_then(|v| v.as_str())
            .unwrap_or(text);

        debug!(url, chars = text.len(), "structured extraction succeeded");
        Ok(ExtractedContent::new(title, text, markdown, "hybrid_firecrawl"))
    }
}
