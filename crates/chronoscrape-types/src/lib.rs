//! Shared domain model for the ChronoScrape archive ingestion pipeline.
//!
//! This crate holds the types that cross crate boundaries: CDX capture
//! records, domain/session/page rows, the classified error taxonomy, and the
//! port traits (`Store`, `Indexer`, `KeyEngine`) behind which the relational
//! store and the search engine live. It deliberately contains no I/O.

pub mod domain;
pub mod error;
pub mod extracted;
pub mod keys;
pub mod page;
pub mod ports;
pub mod records;
pub mod resume;
pub mod session;

pub use domain::{ArchiveSource, DomainDelta, DomainProgress, DomainRecord, DomainSpec, DomainStatus, Project, ProjectDelta};
pub use error::{ErrorKind, IndexerError, KeyEngineError, StoreError};
pub use extracted::ExtractedContent;
pub use keys::{EngineKey, IndexKey, IndexKeyType, KeyConfig, ProjectShare, SharePermission};
pub use page::{NewPageErrorLog, NewScrapePage, PageErrorLog, ScrapePage, ScrapePageDelta, ScrapePageStatus};
pub use ports::{Indexer, KeyEngine, Store};
pub use records::{CdxRecord, MatchType};
pub use resume::{QuerySignature, ResumeDelta, ResumeState, ResumeStatus};
pub use session::{NewSession, ScrapeSession, SessionDelta, SessionStatus};

/// Row identifier aliases. The core never dereferences these; it only hands
/// them back to the store.
pub type ProjectId = i64;
pub type DomainId = i64;
pub type SessionId = i64;
pub type PageId = i64;
pub type ResumeId = i64;
