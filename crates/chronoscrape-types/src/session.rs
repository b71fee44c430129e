//! Scrape sessions: one end-to-end run across a project's domains.

use crate::{ProjectId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Failed
        )
    }
}

/// A session row. `Completed` iff every active domain of the project reached
/// `Completed`; a terminal domain failure makes the session `Failed` once all
/// domains have settled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSession {
    pub id: SessionId,
    pub project_id: ProjectId,
    pub status: SessionStatus,
    pub total_urls: u64,
    pub completed_urls: u64,
    pub failed_urls: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub project_id: ProjectId,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionDelta {
    pub status: Option<SessionStatus>,
    pub total_urls_inc: i64,
    pub completed_urls_inc: i64,
    pub failed_urls_inc: i64,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}
