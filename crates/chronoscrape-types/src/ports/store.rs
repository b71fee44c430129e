use crate::domain::{DomainDelta, DomainRecord, Project, ProjectDelta};
use crate::error::StoreError;
use crate::page::{NewPageErrorLog, NewScrapePage, ScrapePage, ScrapePageDelta};
use crate::resume::{QuerySignature, ResumeDelta, ResumeState};
use crate::session::{NewSession, ScrapeSession, SessionDelta};
use crate::{DomainId, PageId, ProjectId, ResumeId, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Abstract durable store. Single-row mutations are atomic; each delta is
/// applied in one transaction. The orchestrator is the only caller that
/// mutates domain, session, page and resume rows.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_project(&self, id: ProjectId) -> Result<Project, StoreError>;
    async fn update_project(&self, id: ProjectId, delta: ProjectDelta) -> Result<(), StoreError>;

    async fn get_domain(&self, id: DomainId) -> Result<DomainRecord, StoreError>;
    async fn update_domain(&self, id: DomainId, delta: DomainDelta) -> Result<(), StoreError>;
    async fn list_active_domains(&self, project: ProjectId) -> Result<Vec<DomainRecord>, StoreError>;

    /// Returns the single active cursor for the signature, creating one at
    /// page zero when none exists. Implementations must uphold the
    /// at-most-one-active invariant per `(domain, session, signature)`.
    async fn get_or_create_resume_state(
        &self,
        domain: DomainId,
        session: Option<SessionId>,
        signature: QuerySignature,
    ) -> Result<ResumeState, StoreError>;
    async fn update_resume_state(&self, id: ResumeId, delta: ResumeDelta) -> Result<(), StoreError>;
    async fn delete_completed_resume_states_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn find_scrape_page_by_digest(
        &self,
        domain: DomainId,
        digest: &str,
    ) -> Result<Option<ScrapePage>, StoreError>;
    async fn get_scrape_page(&self, id: PageId) -> Result<ScrapePage, StoreError>;
    async fn insert_scrape_page(&self, row: NewScrapePage) -> Result<PageId, StoreError>;
    async fn update_scrape_page(&self, id: PageId, delta: ScrapePageDelta) -> Result<(), StoreError>;
    /// All digests already recorded for the domain, used to seed dedup.
    async fn existing_digests(&self, domain: DomainId) -> Result<HashSet<String>, StoreError>;

    async fn insert_page_error_log(&self, row: NewPageErrorLog) -> Result<(), StoreError>;
    async fn delete_page_error_logs_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn create_session(&self, row: NewSession) -> Result<SessionId, StoreError>;
    async fn get_session(&self, id: SessionId) -> Result<ScrapeSession, StoreError>;
    async fn update_session(&self, id: SessionId, delta: SessionDelta) -> Result<(), StoreError>;
}
