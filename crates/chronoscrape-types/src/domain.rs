//! Projects and the domains they ingest.

use crate::records::MatchType;
use crate::{DomainId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which archive backend a project prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveSource {
    Wayback,
    CommonCrawl,
    Hybrid,
}

impl Default for ArchiveSource {
    fn default() -> Self {
        ArchiveSource::Wayback
    }
}

/// A project owning domains and a search index. The HTTP surface around
/// projects is out of scope; the core only reads routing preferences and
/// key-manager bookkeeping from this row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Search index backing this project, `project_<id>` once provisioned.
    pub index_name: Option<String>,
    /// UID of the project-owner search key, if one has been issued.
    pub index_search_key_uid: Option<String>,
    pub archive_source: ArchiveSource,
    pub fallback_enabled: bool,
}

/// Partial update for a project row. `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default)]
pub struct ProjectDelta {
    pub index_name: Option<Option<String>>,
    pub index_search_key_uid: Option<Option<String>>,
}

/// Lifecycle state of a domain within its project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    Active,
    Paused,
    Completed,
    Error,
}

/// The query half of a domain: what to ask the archive sources for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainSpec {
    pub name: String,
    pub match_type: MatchType,
    pub url_path: Option<String>,
    /// `YYYYMMDD`
    pub from_date: String,
    /// `YYYYMMDD`
    pub to_date: String,
    pub min_page_size: u64,
    pub page_size: u32,
    pub max_pages: Option<u32>,
    pub include_attachments: bool,
}

/// The counter half of a domain, mutated only by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainProgress {
    pub total_pages: u64,
    pub scraped_pages: u64,
    pub failed_pages: u64,
    pub pending_pages: u64,
    pub duplicate_pages: u64,
    pub list_pages_filtered: u64,
    pub success_rate: Option<f64>,
    pub last_scraped: Option<DateTime<Utc>>,
}

/// A domain row as handed out by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRecord {
    pub id: DomainId,
    pub project_id: ProjectId,
    pub status: DomainStatus,
    pub spec: DomainSpec,
    pub progress: DomainProgress,
}

/// Partial update for a domain row. Counter fields are signed increments so
/// concurrent page tasks can adjust them without read-modify-write races;
/// the store applies each delta atomically.
#[derive(Debug, Clone, Default)]
pub struct DomainDelta {
    pub status: Option<DomainStatus>,
    pub total_pages: Option<u64>,
    pub duplicate_pages: Option<u64>,
    pub list_pages_filtered: Option<u64>,
    pub scraped_pages_inc: i64,
    pub failed_pages_inc: i64,
    pub pending_pages_inc: i64,
    pub success_rate: Option<f64>,
    pub last_scraped: Option<DateTime<Utc>>,
}

impl DomainDelta {
    pub fn status(status: DomainStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}
