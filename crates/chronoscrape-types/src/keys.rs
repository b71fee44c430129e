//! Search-index key taxonomy shared with the key manager.

use crate::ProjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four key tiers of the multi-tenant search setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKeyType {
    /// Admin-only; key and index administration. Never reaches request paths.
    Master,
    /// Per-project search key with `search` + `documents.get`.
    ProjectOwner,
    /// Not a key row: a signed JWT tenant token delegating owner rights.
    ProjectShare,
    /// Read-only `search` key for public projects, rate-limited externally.
    Public,
}

/// Access level granted by a project share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharePermission {
    Read,
    Limited,
    Restricted,
    Write,
    Admin,
}

/// A share grant handed to the key manager when minting a tenant token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectShare {
    pub id: i64,
    pub project_id: ProjectId,
    pub permission: SharePermission,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A key row as tracked locally for auditing and rotation decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexKey {
    pub uid: String,
    pub key_type: IndexKeyType,
    pub project_id: Option<ProjectId>,
    pub actions: Vec<String>,
    pub indexes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub active: bool,
}

/// Key creation request against the engine's key-admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyConfig {
    pub actions: Vec<String>,
    pub indexes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub name: String,
    pub description: String,
}

/// A key row as reported back by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineKey {
    pub key: String,
    pub uid: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub actions: Vec<String>,
    pub indexes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl EngineKey {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t < now).unwrap_or(false)
    }
}
