use crate::error::KeyEngineError;
use crate::keys::{EngineKey, KeyConfig};
use async_trait::async_trait;

/// Abstract key-admin API of the search engine. All operations are
/// best-effort idempotent: on transport failure the caller retries with the
/// same arguments and no partial local state is written.
#[async_trait]
pub trait KeyEngine: Send + Sync {
    async fn create_key(&self, config: &KeyConfig) -> Result<EngineKey, KeyEngineError>;
    /// Deleting an absent uid returns `KeyEngineError::NotFound`.
    async fn delete_key(&self, uid: &str) -> Result<(), KeyEngineError>;
    async fn get_key(&self, uid: &str) -> Result<EngineKey, KeyEngineError>;
    async fn list_keys(&self) -> Result<Vec<EngineKey>, KeyEngineError>;
}
