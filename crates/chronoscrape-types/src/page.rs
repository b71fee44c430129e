//! Per-capture durable rows and their state machine.

use crate::{DomainId, PageId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State machine for a single capture's processing.
///
/// ```text
/// pending -> in_progress -> completed
///                        -> failed
///                        -> retry -> in_progress ...
/// ```
///
/// `Completed` and `Failed`-past-retries are terminal; no transition leaves
/// them. Transition validity is checked here so every mutation site shares
/// one rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapePageStatus {
    Pending,
    InProgress,
    Retry,
    Completed,
    Failed,
}

impl ScrapePageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScrapePageStatus::Completed)
    }

    /// Whether `self -> next` is a legal edge of the state machine.
    /// `Failed` may still move to `Retry` (the retry policy decides).
    pub fn can_transition_to(&self, next: ScrapePageStatus) -> bool {
        use ScrapePageStatus::*;
        match (self, next) {
            (Pending, InProgress) => true,
            (InProgress, Completed) | (InProgress, Failed) => true,
            (Failed, Retry) => true,
            (Retry, InProgress) => true,
            _ => false,
        }
    }
}

/// A capture scheduled for (or finished with) extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapePage {
    pub id: PageId,
    pub domain_id: DomainId,
    pub session_id: Option<SessionId>,
    pub original_url: String,
    pub archive_url: String,
    /// CDX timestamp, `YYYYMMDDHHMMSS`.
    pub timestamp: String,
    pub mime_type: String,
    pub status_code: u16,
    pub content_length: Option<u64>,
    /// Unique within `(domain_id, digest)`.
    pub digest: String,
    pub status: ScrapePageStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_type: Option<String>,

    // Extracted fields, populated on completion.
    pub title: Option<String>,
    pub extracted_text: Option<String>,
    pub markdown_content: Option<String>,
    pub meta_description: Option<String>,
    pub author: Option<String>,
    pub published_date: Option<DateTime<Utc>>,
    pub language: Option<String>,
    pub word_count: Option<u64>,
    pub extraction_method: Option<String>,
    pub extraction_secs: Option<f64>,
    pub total_processing_secs: Option<f64>,
}

impl ScrapePage {
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type.to_ascii_lowercase().contains("pdf")
    }
}

/// Insert shape for a fresh pending page.
#[derive(Debug, Clone)]
pub struct NewScrapePage {
    pub domain_id: DomainId,
    pub session_id: Option<SessionId>,
    pub original_url: String,
    pub archive_url: String,
    pub timestamp: String,
    pub mime_type: String,
    pub status_code: u16,
    pub content_length: Option<u64>,
    pub digest: String,
    pub max_retries: u32,
}

/// Partial update for a page row.
#[derive(Debug, Clone, Default)]
pub struct ScrapePageDelta {
    pub status: Option<ScrapePageStatus>,
    pub retry_count: Option<u32>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<Option<DateTime<Utc>>>,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub title: Option<String>,
    pub extracted_text: Option<String>,
    pub markdown_content: Option<String>,
    pub meta_description: Option<String>,
    pub author: Option<String>,
    pub published_date: Option<DateTime<Utc>>,
    pub language: Option<String>,
    pub word_count: Option<u64>,
    pub extraction_method: Option<String>,
    pub extraction_secs: Option<f64>,
    pub total_processing_secs: Option<f64>,
}

/// Durable log row written for every failed page attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageErrorLog {
    pub id: i64,
    pub scrape_page_id: PageId,
    pub session_id: Option<SessionId>,
    pub error_type: String,
    pub error_message: String,
    pub original_url: String,
    pub archive_url: String,
    pub is_recoverable: bool,
    pub suggested_retry_delay_secs: Option<u64>,
    pub occurred_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewPageErrorLog {
    pub scrape_page_id: PageId,
    pub session_id: Option<SessionId>,
    pub error_type: String,
    pub error_message: String,
    pub original_url: String,
    pub archive_url: String,
    pub is_recoverable: bool,
    pub suggested_retry_delay_secs: Option<u64>,
}
