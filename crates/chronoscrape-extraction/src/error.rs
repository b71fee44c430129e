//! Extraction failures, classified for the orchestrator's retry policy.

use chronoscrape_fetch::FetchError;
use chronoscrape_pdf::PdfError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("content fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("structured extraction service failed: {0}")]
    Structured(String),

    #[error("pdf extraction failed: {0}")]
    Pdf(#[from] PdfError),

    #[error("html extraction failed: {0}")]
    Html(String),
}

impl ExtractionError {
    /// Stable error-type string persisted on the page row and its error log.
    pub fn error_type(&self) -> String {
        match self {
            ExtractionError::Fetch(FetchError::Timeout)
            | ExtractionError::Fetch(FetchError::Connection(_)) => "timeout".to_string(),
            ExtractionError::Fetch(FetchError::HttpStatus(code)) => format!("http_{code}"),
            ExtractionError::Fetch(FetchError::ContentTooLarge { .. }) => {
                "content_too_large".to_string()
            }
            ExtractionError::Fetch(FetchError::Transport(_)) => "timeout".to_string(),
            ExtractionError::UnsupportedContentType(_) => "unsupported_content_type".to_string(),
            ExtractionError::Structured(_) | ExtractionError::Html(_) | ExtractionError::Pdf(_) => {
                "content_extraction".to_string()
            }
        }
    }

    /// Whether a retry may succeed. Size-cap and content-type violations are
    /// permanent; transport hiccups and extraction failures are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ExtractionError::Fetch(FetchError::ContentTooLarge { .. }) => false,
            ExtractionError::Fetch(FetchError::HttpStatus(code)) => *code >= 500,
            ExtractionError::Fetch(_) => true,
            ExtractionError::UnsupportedContentType(_) => false,
            ExtractionError::Structured(_) | ExtractionError::Html(_) | ExtractionError::Pdf(_) => {
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_and_recoverability() {
        let err = ExtractionError::Fetch(FetchError::HttpStatus(404));
        assert_eq!(err.error_type(), "http_404");
        assert!(!err.is_recoverable());

        let err = ExtractionError::Fetch(FetchError::HttpStatus(503));
        assert!(err.is_recoverable());

        let err = ExtractionError::Structured("empty response".into());
        assert_eq!(err.error_type(), "content_extraction");
        assert!(err.is_recoverable());

        let err = ExtractionError::Fetch(FetchError::ContentTooLarge {
            size: 100,
            limit: 10,
        });
        assert!(!err.is_recoverable());
    }
}
