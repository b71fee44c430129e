//! Archive-layer errors and the attempt log the router builds from them.

use chronoscrape_types::ErrorKind;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited{}", .retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimit { retry_after_secs: Option<u64> },

    /// 401/407 from a proxy or key. Operator fix required.
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("provider error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("circuit open for source {source_name}")]
    CircuitOpen { source_name: &'static str },

    /// The router's per-strategy deadline elapsed.
    #[error("strategy deadline elapsed after {0:?}")]
    StrategyTimeout(Duration),

    #[error("unparseable provider response: {0}")]
    Api(String),

    #[error("index segment I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("all {attempt_count} archive sources failed for {domain}")]
    AllSourcesFailed {
        domain: String,
        attempt_count: usize,
        attempts: Vec<AttemptRecord>,
    },
}

impl ArchiveError {
    /// Map onto the stable taxonomy used by metrics and fallback policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::Connection(_) => ErrorKind::ConnectionError,
            ArchiveError::Timeout(_) => ErrorKind::Timeout,
            ArchiveError::RateLimit { .. } => ErrorKind::RateLimit,
            ArchiveError::Auth(_) => ErrorKind::AuthError,
            ArchiveError::Server { .. } => ErrorKind::ServerError,
            ArchiveError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ArchiveError::StrategyTimeout(_) => ErrorKind::StrategyTimeout,
            ArchiveError::Api(_) => ErrorKind::ApiError,
            ArchiveError::Io(_) => ErrorKind::ConnectionError,
            ArchiveError::AllSourcesFailed { .. } => ErrorKind::Unexpected,
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ArchiveError::Timeout(err.to_string())
        } else if err.is_connect() {
            ArchiveError::Connection(err.to_string())
        } else {
            ArchiveError::Api(err.to_string())
        }
    }
}

/// Source-prefixed error label, e.g. `smartproxy_auth_error`. Strategy
/// timeouts are router-level and stay unprefixed.
pub fn error_type_label(source_label: &str, kind: ErrorKind) -> String {
    match kind {
        ErrorKind::StrategyTimeout => kind.as_str().to_string(),
        _ => format!("{}_{}", source_label, kind.as_str()),
    }
}

/// One entry of the router's per-query attempt log.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub source: String,
    pub success: bool,
    pub duration_secs: f64,
    pub records: usize,
    pub error: Option<String>,
    pub error_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_prefix_source() {
        assert_eq!(
            error_type_label("smartproxy", ErrorKind::AuthError),
            "smartproxy_auth_error"
        );
        assert_eq!(
            error_type_label("wayback", ErrorKind::Timeout),
            "wayback_timeout"
        );
    }

    #[test]
    fn strategy_timeout_is_unprefixed() {
        assert_eq!(
            error_type_label("wayback", ErrorKind::StrategyTimeout),
            "strategy_timeout"
        );
    }

    #[test]
    fn kinds_map_onto_taxonomy() {
        assert_eq!(
            ArchiveError::RateLimit {
                retry_after_secs: Some(60)
            }
            .kind(),
            ErrorKind::RateLimit
        );
        assert_eq!(
            ArchiveError::Auth("407".into()).kind(),
            ErrorKind::AuthError
        );
    }
}
