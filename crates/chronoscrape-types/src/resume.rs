//! Resumable CDX pagination cursors.

use crate::records::MatchType;
use crate::{DomainId, ResumeId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one logical CDX query. At most one `Active` cursor may exist
/// per `(domain, session, signature)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuerySignature {
    pub from_date: String,
    pub to_date: String,
    pub match_type: MatchType,
    pub url_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeStatus {
    Active,
    Completed,
    Failed,
}

/// Durable cursor recording where pagination of a query left off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeState {
    pub id: ResumeId,
    pub domain_id: DomainId,
    pub session_id: Option<SessionId>,
    pub signature: QuerySignature,
    /// Next CDX page index to fetch.
    pub current_page: u32,
    pub total_pages: u64,
    pub total_records_found: u64,
    pub status: ResumeStatus,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ResumeState {
    /// A cursor can seed the next run only while it is mid-flight.
    pub fn can_resume(&self) -> bool {
        matches!(self.status, ResumeStatus::Active | ResumeStatus::Failed) && self.current_page > 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResumeDelta {
    pub current_page: Option<u32>,
    pub total_pages: Option<u64>,
    pub total_records_found: Option<u64>,
    pub status: Option<ResumeStatus>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}
