use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; ChronoScrape/2.0; +https://chronoscrape.com)";

/// Content fetcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetcherConfig {
    /// Total request timeout
    pub timeout_secs: u64,
    /// Hard cap on body size, enforced on the advertised length and on the
    /// bytes actually read
    pub max_content_size: u64,
    /// Transport-level retry attempts (timeouts and connection errors only)
    pub max_retries: u32,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_content_size: 50 * 1024 * 1024,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("content too large: {size} bytes exceeds {limit} byte cap")]
    ContentTooLarge { size: u64, limit: u64 },
    /// HTTP >= 400. Never retried here; the orchestrator classifies it.
    #[error("HTTP {0}")]
    HttpStatus(u16),
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

impl FetchError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() {
            FetchError::Connection(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }

    fn is_retriable(&self) -> bool {
        matches!(self, FetchError::Timeout | FetchError::Connection(_))
    }
}

/// HTTP client for retrieving capture bodies.
#[derive(Debug, Clone)]
pub struct ContentFetcher {
    client: Client,
    config: FetcherConfig,
}

impl ContentFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .gzip(true)
            .brotli(true)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(20)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Fetch `url`, returning `(bytes, content_type)`.
    ///
    /// Retries timeouts and connection failures up to `max_retries` times
    /// with exponential backoff (5s..30s). HTTP errors and size violations
    /// fail immediately.
    pub async fn fetch(&self, url: &str) -> Result<(Bytes, String), FetchError> {
        let mut last_error = None;
        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                let delay = (2u64 << attempt).clamp(5, 30);
                warn!(url, attempt, delay_secs = delay, "retrying content fetch");
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
            match self.fetch_once(url).await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_retriable() => {
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or_else(|| FetchError::Transport("no attempts made".into())))
    }

    async fn fetch_once(&self, url: &str) -> Result<(Bytes, String), FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        // Reject on the advertised size before reading anything.
        if let Some(advertised) = response.content_length() {
            if advertised > self.config.max_content_size {
                return Err(FetchError::ContentTooLarge {
                    size: advertised,
                    limit: self.config.max_content_size,
                });
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_ascii_lowercase();

        // Stream the body so oversized responses abort at the cap instead of
        // buffering fully.
        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(FetchError::from_reqwest)?;
            if (body.len() + chunk.len()) as u64 > self.config.max_content_size {
                return Err(FetchError::ContentTooLarge {
                    size: (body.len() + chunk.len()) as u64,
                    limit: self.config.max_content_size,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url, bytes = body.len(), content_type, "fetched capture body");
        Ok((body.freeze(), content_type))
    }
}
