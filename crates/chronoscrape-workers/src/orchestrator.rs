use crate::config::OrchestratorConfig;
use chrono::Utc;
use chronoscrape_archive::{ArchiveError, ArchiveRouter, CaptureQuery};
use chronoscrape_extraction::HybridExtractor;
use chronoscrape_types::{
    CdxRecord, DomainDelta, DomainRecord, DomainStatus, ExtractedContent, Indexer, NewPageErrorLog,
    NewScrapePage, NewSession, PageId, Project, ProjectId, QuerySignature, ResumeDelta,
    ResumeStatus, ScrapePage, ScrapePageDelta, ScrapePageStatus, SessionDelta, SessionId,
    SessionStatus, Store, StoreError,
};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    #[error("archive discovery failed: {0}")]
    Archive(#[from] ArchiveError),
    #[error("task rejected at hard deadline")]
    DeadlineExceeded,
}

/// Result of one session run.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub domains_total: usize,
    pub domains_completed: usize,
    pub domains_failed: usize,
    pub pages_enqueued: u64,
    pub pages_completed: u64,
    pub pages_failed: u64,
}

/// Counts reported by the maintenance task.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CleanupReport {
    pub deleted_error_logs: u64,
    pub deleted_resume_states: u64,
}

#[derive(Debug, Default)]
struct DomainRunOutcome {
    pages_enqueued: u64,
    pages_completed: u64,
    pages_failed: u64,
}

enum PageOutcome {
    Completed,
    Failed,
    Retry { delay_secs: u64 },
}

/// Drives the full scrape workflow. Owns every mutation of domain, session,
/// page and resume rows; all collaborators arrive by injection.
pub struct TaskOrchestrator {
    store: Arc<dyn Store>,
    router: Arc<ArchiveRouter>,
    extractor: Arc<HybridExtractor>,
    indexer: Option<Arc<dyn Indexer>>,
    config: OrchestratorConfig,
}

impl TaskOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        router: Arc<ArchiveRouter>,
        extractor: Arc<HybridExtractor>,
        indexer: Option<Arc<dyn Indexer>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            router,
            extractor,
            indexer,
            config,
        }
    }

    /// Run one scrape session across all active domains of the project.
    ///
    /// The session completes iff every active domain completes; any terminal
    /// domain failure makes it `Failed` once the rest have settled.
    pub async fn start_project_scrape(
        &self,
        project_id: ProjectId,
    ) -> Result<SessionSummary, OrchestratorError> {
        let project = self.store.get_project(project_id).await?;
        let session_id = self
            .store
            .create_session(NewSession {
                project_id,
                status: SessionStatus::Running,
                started_at: Utc::now(),
            })
            .await?;

        let domains = self.store.list_active_domains(project_id).await?;
        info!(project_id, session_id, domains = domains.len(), "starting project scrape");

        if domains.is_empty() {
            warn!(project_id, "no active domains, completing session immediately");
            self.store
                .update_session(
                    session_id,
                    SessionDelta {
                        status: Some(SessionStatus::Completed),
                        completed_at: Some(Utc::now()),
                        ..SessionDelta::default()
                    },
                )
                .await?;
            return Ok(SessionSummary {
                session_id,
                domains_total: 0,
                domains_completed: 0,
                domains_failed: 0,
                pages_enqueued: 0,
                pages_completed: 0,
                pages_failed: 0,
            });
        }

        let domains_total = domains.len();
        let outcomes = join_all(domains.into_iter().map(|domain| {
            let project = project.clone();
            async move {
                let domain_id = domain.id;
                let outcome = self.scrape_domain(&project, session_id, domain).await;
                (domain_id, outcome)
            }
        }))
        .await;

        let mut summary = SessionSummary {
            session_id,
            domains_total,
            domains_completed: 0,
            domains_failed: 0,
            pages_enqueued: 0,
            pages_completed: 0,
            pages_failed: 0,
        };
        let mut first_error: Option<String> = None;
        for (domain_id, outcome) in outcomes {
            match outcome {
                Ok(run) => {
                    summary.domains_completed += 1;
                    summary.pages_enqueued += run.pages_enqueued;
                    summary.pages_completed += run.pages_completed;
                    summary.pages_failed += run.pages_failed;
                }
                Err(err) => {
                    summary.domains_failed += 1;
                    error!(domain_id, error = %err, "domain scrape failed");
                    first_error.get_or_insert_with(|| err.to_string());
                }
            }
        }

        let delta = if summary.domains_failed == 0 {
            SessionDelta {
                status: Some(SessionStatus::Completed),
                completed_at: Some(Utc::now()),
                ..SessionDelta::default()
            }
        } else {
            SessionDelta {
                status: Some(SessionStatus::Failed),
                completed_at: Some(Utc::now()),
                error_message: first_error,
                ..SessionDelta::default()
            }
        };
        self.store.update_session(session_id, delta).await?;

        info!(
            session_id,
            completed = summary.domains_completed,
            failed = summary.domains_failed,
            pages = summary.pages_enqueued,
            "project scrape finished"
        );
        Ok(summary)
    }

    async fn scrape_domain(
        &self,
        project: &Project,
        session_id: SessionId,
        domain: DomainRecord,
    ) -> Result<DomainRunOutcome, OrchestratorError> {
        let spec = &domain.spec;
        self.store
            .update_domain(domain.id, DomainDelta::status(DomainStatus::Active))
            .await?;

        let existing_digests = self.store.existing_digests(domain.id).await?;
        let signature = QuerySignature {
            from_date: spec.from_date.clone(),
            to_date: spec.to_date.clone(),
            match_type: spec.match_type,
            url_path: spec.url_path.clone(),
        };
        let resume = self
            .store
            .get_or_create_resume_state(domain.id, Some(session_id), signature)
            .await?;

        let mut query = CaptureQuery::new(&spec.name, &spec.from_date, &spec.to_date);
        query.match_type = spec.match_type;
        query.url_path = spec.url_path.clone();
        query.min_size = spec.min_page_size;
        query.page_size = spec.page_size;
        query.max_pages = spec.max_pages;
        query.include_attachments = spec.include_attachments;
        query.resume_from_page = if resume.can_resume() {
            info!(domain = %spec.name, page = resume.current_page, "resuming CDX pagination");
            resume.current_page
        } else {
            0
        };
        query.existing_digests = existing_digests;

        let (records, stats) = match self
            .router
            .query_unified(project.archive_source, project.fallback_enabled, &query)
            .await
        {
            Ok(ok) => ok,
            Err(err) => {
                self.store
                    .update_resume_state(
                        resume.id,
                        ResumeDelta {
                            status: Some(ResumeStatus::Failed),
                            error_message: Some(err.to_string()),
                            ..ResumeDelta::default()
                        },
                    )
                    .await?;
                self.store
                    .update_domain(domain.id, DomainDelta::status(DomainStatus::Error))
                    .await?;
                return Err(err.into());
            }
        };

        self.store
            .update_domain(
                domain.id,
                DomainDelta {
                    total_pages: Some(stats.query.total_pages),
                    duplicate_pages: Some(stats.query.duplicate_filtered),
                    list_pages_filtered: Some(stats.query.list_filtered),
                    ..DomainDelta::default()
                },
            )
            .await?;
        self.store
            .update_resume_state(
                resume.id,
                ResumeDelta {
                    total_pages: Some(stats.query.total_pages),
                    total_records_found: Some(stats.query.total_records),
                    status: Some(ResumeStatus::Completed),
                    completed_at: Some(Utc::now()),
                    ..ResumeDelta::default()
                },
            )
            .await?;

        // Enqueue a pending page for every capture this domain has not seen.
        let mut page_ids: Vec<PageId> = Vec::with_capacity(records.len());
        for record in &records {
            if self
                .store
                .find_scrape_page_by_digest(domain.id, &record.digest)
                .await?
                .is_some()
            {
                debug!(url = %record.original_url, "capture already recorded, skipping");
                continue;
            }
            let page_id = self
                .store
                .insert_scrape_page(NewScrapePage {
                    domain_id: domain.id,
                    session_id: Some(session_id),
                    original_url: record.original_url.clone(),
                    archive_url: record.archive_url(),
                    timestamp: record.timestamp.clone(),
                    mime_type: record.mime_type.clone(),
                    status_code: record.status_code,
                    content_length: record.length,
                    digest: record.digest.clone(),
                    max_retries: self.config.max_retries_per_page,
                })
                .await?;
            page_ids.push(page_id);
        }

        if !page_ids.is_empty() {
            self.store
                .update_domain(
                    domain.id,
                    DomainDelta {
                        pending_pages_inc: page_ids.len() as i64,
                        ..DomainDelta::default()
                    },
                )
                .await?;
            self.store
                .update_session(
                    session_id,
                    SessionDelta {
                        total_urls_inc: page_ids.len() as i64,
                        ..SessionDelta::default()
                    },
                )
                .await?;
        }

        let mut outcome = DomainRunOutcome {
            pages_enqueued: page_ids.len() as u64,
            ..DomainRunOutcome::default()
        };

        // Extraction tasks run with bounded parallelism, batched.
        for chunk in page_ids.chunks(self.config.extraction_batch_size) {
            let results = join_all(
                chunk
                    .iter()
                    .map(|page_id| self.run_page_task(project, *page_id)),
            )
            .await;
            for result in results {
                match result {
                    Ok(true) => outcome.pages_completed += 1,
                    Ok(false) => outcome.pages_failed += 1,
                    Err(err) => {
                        outcome.pages_failed += 1;
                        warn!(error = %err, "page task errored");
                    }
                }
            }
        }

        self.store
            .update_session(
                session_id,
                SessionDelta {
                    completed_urls_inc: outcome.pages_completed as i64,
                    failed_urls_inc: outcome.pages_failed as i64,
                    ..SessionDelta::default()
                },
            )
            .await?;

        // Finalize the domain with its success rate.
        let current = self.store.get_domain(domain.id).await?;
        let attempted = current.progress.scraped_pages + current.progress.failed_pages;
        let success_rate = (attempted > 0)
            .then(|| current.progress.scraped_pages as f64 / attempted as f64 * 100.0);
        self.store
            .update_domain(
                domain.id,
                DomainDelta {
                    status: Some(DomainStatus::Completed),
                    success_rate,
                    ..DomainDelta::default()
                },
            )
            .await?;

        info!(
            domain = %spec.name,
            enqueued = outcome.pages_enqueued,
            completed = outcome.pages_completed,
            failed = outcome.pages_failed,
            "domain scrape complete"
        );
        Ok(outcome)
    }

    /// One page task under the soft/hard deadline pair: soft expiry fails the
    /// page cleanly, hard expiry rejects the task.
    async fn run_page_task(
        &self,
        project: &Project,
        page_id: PageId,
    ) -> Result<bool, OrchestratorError> {
        let soft = Duration::from_secs(self.config.soft_deadline_secs);
        let hard = Duration::from_secs(self.config.hard_deadline_secs);

        let guarded = tokio::time::timeout(hard, async {
            match tokio::time::timeout(soft, self.drive_page(project, page_id)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(page_id, "soft deadline elapsed, failing page cleanly");
                    self.fail_page_for_timeout(page_id).await?;
                    Ok(false)
                }
            }
        })
        .await;

        match guarded {
            Ok(result) => result,
            Err(_) => {
                error!(page_id, "hard deadline elapsed, rejecting task");
                Err(OrchestratorError::DeadlineExceeded)
            }
        }
    }

    /// Drive one page through its state machine until a terminal outcome,
    /// sleeping through scheduled retries.
    async fn drive_page(
        &self,
        project: &Project,
        page_id: PageId,
    ) -> Result<bool, OrchestratorError> {
        loop {
            match self.attempt_page(project, page_id).await? {
                PageOutcome::Completed => return Ok(true),
                PageOutcome::Failed => return Ok(false),
                PageOutcome::Retry { delay_secs } => {
                    debug!(page_id, delay_secs, "retry scheduled");
                    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                }
            }
        }
    }

    async fn attempt_page(
        &self,
        project: &Project,
        page_id: PageId,
    ) -> Result<PageOutcome, OrchestratorError> {
        let page = self.store.get_scrape_page(page_id).await?;
        if page.status.is_terminal() {
            return Ok(PageOutcome::Completed);
        }
        if !page.status.can_transition_to(ScrapePageStatus::InProgress) {
            warn!(page_id, status = ?page.status, "page not dispatchable, leaving as-is");
            return Ok(PageOutcome::Failed);
        }

        let wall = Instant::now();
        self.store
            .update_scrape_page(
                page_id,
                ScrapePageDelta {
                    status: Some(ScrapePageStatus::InProgress),
                    last_attempt_at: Some(Utc::now()),
                    ..ScrapePageDelta::default()
                },
            )
            .await?;

        let record = CdxRecord {
            timestamp: page.timestamp.clone(),
            original_url: page.original_url.clone(),
            mime_type: page.mime_type.clone(),
            status_code: page.status_code,
            digest: page.digest.clone(),
            length: page.content_length,
        };

        match self.extractor.extract(&record).await {
            Ok(content) => {
                self.complete_page(&page, &content, wall.elapsed().as_secs_f64())
                    .await?;
                self.index_page(project, &page, &content).await;
                Ok(PageOutcome::Completed)
            }
            Err(err) => {
                let error_type = err.error_type();
                let recoverable = err.is_recoverable();
                self.store
                    .update_scrape_page(
                        page_id,
                        ScrapePageDelta {
                            status: Some(ScrapePageStatus::Failed),
                            error_message: Some(err.to_string()),
                            error_type: Some(error_type.clone()),
                            ..ScrapePageDelta::default()
                        },
                    )
                    .await?;
                self.store
                    .insert_page_error_log(NewPageErrorLog {
                        scrape_page_id: page_id,
                        session_id: page.session_id,
                        error_type,
                        error_message: err.to_string(),
                        original_url: page.original_url.clone(),
                        archive_url: page.archive_url.clone(),
                        is_recoverable: recoverable,
                        suggested_retry_delay_secs: recoverable
                            .then(|| self.config.retry_delay_secs(page.retry_count)),
                    })
                    .await?;

                if recoverable && page.retry_count < page.max_retries {
                    let delay_secs = self.config.retry_delay_secs(page.retry_count);
                    self.store
                        .update_scrape_page(
                            page_id,
                            ScrapePageDelta {
                                status: Some(ScrapePageStatus::Retry),
                                retry_count: Some(page.retry_count + 1),
                                next_retry_at: Some(Some(
                                    Utc::now() + chrono::Duration::seconds(delay_secs as i64),
                                )),
                                ..ScrapePageDelta::default()
                            },
                        )
                        .await?;
                    Ok(PageOutcome::Retry { delay_secs })
                } else {
                    self.store
                        .update_domain(
                            page.domain_id,
                            DomainDelta {
                                failed_pages_inc: 1,
                                pending_pages_inc: -1,
                                ..DomainDelta::default()
                            },
                        )
                        .await?;
                    Ok(PageOutcome::Failed)
                }
            }
        }
    }

    async fn complete_page(
        &self,
        page: &ScrapePage,
        content: &ExtractedContent,
        total_processing_secs: f64,
    ) -> Result<(), OrchestratorError> {
        self.store
            .update_scrape_page(
                page.id,
                ScrapePageDelta {
                    status: Some(ScrapePageStatus::Completed),
                    completed_at: Some(Utc::now()),
                    title: Some(content.title.clone()),
                    extracted_text: Some(content.text.clone()),
                    markdown_content: Some(content.markdown.clone()),
                    meta_description: content.meta_description.clone(),
                    author: content.author.clone(),
                    published_date: content.published_date,
                    language: content.language.clone(),
                    word_count: Some(content.word_count as u64),
                    extraction_method: Some(content.extraction_method.clone()),
                    extraction_secs: Some(content.extraction_secs),
                    total_processing_secs: Some(total_processing_secs),
                    ..ScrapePageDelta::default()
                },
            )
            .await?;
        self.store
            .update_domain(
                page.domain_id,
                DomainDelta {
                    scraped_pages_inc: 1,
                    pending_pages_inc: -1,
                    last_scraped: Some(Utc::now()),
                    ..DomainDelta::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn fail_page_for_timeout(&self, page_id: PageId) -> Result<(), OrchestratorError> {
        let page = self.store.get_scrape_page(page_id).await?;
        if page.status.is_terminal() {
            return Ok(());
        }
        self.store
            .update_scrape_page(
                page_id,
                ScrapePageDelta {
                    status: Some(ScrapePageStatus::Failed),
                    error_message: Some("task soft deadline elapsed".to_string()),
                    error_type: Some("timeout".to_string()),
                    ..ScrapePageDelta::default()
                },
            )
            .await?;
        self.store
            .insert_page_error_log(NewPageErrorLog {
                scrape_page_id: page_id,
                session_id: page.session_id,
                error_type: "timeout".to_string(),
                error_message: "task soft deadline elapsed".to_string(),
                original_url: page.original_url.clone(),
                archive_url: page.archive_url.clone(),
                is_recoverable: true,
                suggested_retry_delay_secs: Some(self.config.retry_delay_secs(page.retry_count)),
            })
            .await?;
        self.store
            .update_domain(
                page.domain_id,
                DomainDelta {
                    failed_pages_inc: 1,
                    pending_pages_inc: -1,
                    ..DomainDelta::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Indexing failures never fail the page.
    async fn index_page(&self, project: &Project, page: &ScrapePage, content: &ExtractedContent) {
        let (Some(indexer), Some(index_name)) = (self.indexer.as_ref(), project.index_name.as_ref())
        else {
            return;
        };
        let document = serde_json::json!({
            "id": page.id,
            "domain_id": page.domain_id,
            "url": page.original_url,
            "archive_url": page.archive_url,
            "timestamp": page.timestamp,
            "title": content.title,
            "content": content.text,
            "markdown": content.markdown,
            "meta_description": content.meta_description,
            "author": content.author,
            "published_date": content.published_date,
            "language": content.language,
            "word_count": content.word_count,
            "extraction_method": content.extraction_method,
        });
        if let Err(err) = indexer.index(index_name, document).await {
            warn!(page_id = page.id, error = %err, "indexing failed, page remains completed");
        }
    }

    /// Maintenance: drop resolved error logs and completed resume states
    /// older than `days`.
    pub async fn cleanup_old_data(&self, days: i64) -> Result<CleanupReport, OrchestratorError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let deleted_error_logs = self.store.delete_page_error_logs_older_than(cutoff).await?;
        let deleted_resume_states = self
            .store
            .delete_completed_resume_states_older_than(cutoff)
            .await?;
        info!(
            deleted_error_logs,
            deleted_resume_states, "cleanup pass finished"
        );
        Ok(CleanupReport {
            deleted_error_logs,
            deleted_resume_states,
        })
    }
}
