//! Classified error taxonomy shared by strategies, router and orchestrator.
//!
//! Retriability and classification are first-class values here, not string
//! matches at the call site. Source strategies map their transport failures
//! into an [`ErrorKind`]; the router and the per-page error log consume the
//! kind, never the message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error classification used for metrics and fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection reset, refused, or DNS failure.
    ConnectionError,
    /// Request or read timed out at the transport.
    Timeout,
    /// Provider returned 429 or an explicit rate-limit body.
    RateLimit,
    /// 401/407 on a proxy or key. Needs an operator fix, never retried.
    AuthError,
    /// 5xx from the provider.
    ServerError,
    /// The strategy's circuit breaker rejected the call.
    CircuitOpen,
    /// The router's per-strategy deadline elapsed.
    StrategyTimeout,
    /// Body exceeded the configured size cap.
    ContentTooLarge,
    /// MIME type the pipeline cannot extract.
    UnsupportedContentType,
    /// Extraction ran but produced an error; recoverable.
    ContentExtraction,
    /// Provider answered with something unparseable.
    ApiError,
    /// Anything else; terminal.
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::ServerError => "server_error",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::StrategyTimeout => "strategy_timeout",
            ErrorKind::ContentTooLarge => "content_too_large",
            ErrorKind::UnsupportedContentType => "unsupported_content_type",
            ErrorKind::ContentExtraction => "content_extraction",
            ErrorKind::ApiError => "api_error",
            ErrorKind::Unexpected => "unexpected",
        }
    }

    /// Whether a failure of this kind may succeed on a later attempt.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionError
                | ErrorKind::Timeout
                | ErrorKind::RateLimit
                | ErrorKind::ServerError
                | ErrorKind::StrategyTimeout
                | ErrorKind::ContentExtraction
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures surfaced by the abstract relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row not found: {0}")]
    NotFound(String),
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Failures surfaced by the abstract search indexer. Indexing is non-fatal
/// to ingestion, so callers usually log these and continue.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("indexer unavailable: {0}")]
    Unavailable(String),
    #[error("indexer rejected request: {0}")]
    Backend(String),
}

/// Failures surfaced by the key-administration API of the search engine.
#[derive(Debug, Error)]
pub enum KeyEngineError {
    #[error("api key not found: {0}")]
    NotFound(String),
    #[error("key engine transport failure: {0}")]
    Transport(String),
    #[error("key engine rejected request: {0}")]
    Backend(String),
}
