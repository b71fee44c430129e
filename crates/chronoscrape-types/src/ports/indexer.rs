use crate::error::IndexerError;
use async_trait::async_trait;

/// Abstract full-text index. Document identity is the `id` field of the
/// submitted document. Indexer unavailability is non-fatal to ingestion: a
/// page still completes in the store when `index` fails.
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn ensure_index(&self, index_name: &str, primary_key: &str) -> Result<(), IndexerError>;
    async fn index(&self, index_name: &str, document: serde_json::Value) -> Result<(), IndexerError>;
    async fn delete_index(&self, index_name: &str) -> Result<(), IndexerError>;
    async fn health(&self) -> Result<(), IndexerError>;
}
