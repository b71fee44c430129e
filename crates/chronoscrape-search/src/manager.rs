use chrono::{Duration, Utc};
use chronoscrape_types::{
    EngineKey, IndexKey, IndexKeyType, KeyConfig, KeyEngine, KeyEngineError, Project, ProjectId,
    ProjectShare, SharePermission,
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Key manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct KeyManagerConfig {
    /// Owner keys expire after this many days and get rotated.
    pub key_rotation_days: i64,
    /// Default lifetime of a tenant token when the share has no expiry.
    pub tenant_token_ttl_hours: i64,
    /// Requests per window granted to public keys by the external limiter.
    pub public_key_rate_limit: u32,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            key_rotation_days: 90,
            tenant_token_ttl_hours: 24,
            public_key_rate_limit: 1000,
        }
    }
}

#[derive(Debug, Error)]
pub enum KeyManagerError {
    #[error("project {0} has no owner key to base a tenant token on")]
    MissingOwnerKey(ProjectId),
    #[error("tenant token signing failed: {0}")]
    TokenSigning(String),
    #[error(transparent)]
    Engine(#[from] KeyEngineError),
}

/// Status report for a single key uid.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KeyStatus {
    Active { key: Box<EngineKey> },
    NotFound,
}

/// JWT claims of a tenant token, per the engine's tenant-token format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantClaims {
    pub search_rules: BTreeMap<String, SearchRule>,
    pub api_key_uid: String,
    pub exp: i64,
}

/// Per-index search rule carried by a tenant token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Filter expression a share permission grants over the project index.
fn permission_filter(permission: SharePermission) -> Option<String> {
    match permission {
        SharePermission::Read => None,
        SharePermission::Limited => Some("review_status != 'irrelevant'".to_string()),
        SharePermission::Restricted => Some("review_status = 'relevant'".to_string()),
        // Non-search capabilities are out of core scope; no search filter.
        SharePermission::Write | SharePermission::Admin => None,
    }
}

/// Index name backing a project.
pub fn project_index_name(project_id: ProjectId) -> String {
    format!("project_{project_id}")
}

/// Key lifecycle manager over the engine's key-admin API. All operations are
/// best-effort idempotent; no partial local state is written on transport
/// failure. Issued keys are mirrored into an [`IndexKey`] audit ledger that
/// tracks usage counts, last-use instants and active flags for rotation
/// decisions.
pub struct IndexKeyManager {
    engine: Arc<dyn KeyEngine>,
    master_key: String,
    config: KeyManagerConfig,
    audit: Mutex<HashMap<String, IndexKey>>,
}

impl IndexKeyManager {
    pub fn new(engine: Arc<dyn KeyEngine>, master_key: impl Into<String>, config: KeyManagerConfig) -> Self {
        Self {
            engine,
            master_key: master_key.into(),
            config,
            audit: Mutex::new(HashMap::new()),
        }
    }

    /// Record a freshly issued key in the audit ledger.
    fn record_issued(&self, key: &EngineKey, key_type: IndexKeyType, project_id: Option<ProjectId>) {
        self.audit.lock().insert(
            key.uid.clone(),
            IndexKey {
                uid: key.uid.clone(),
                key_type,
                project_id,
                actions: key.actions.clone(),
                indexes: key.indexes.clone(),
                created_at: key.created_at.unwrap_or_else(Utc::now),
                expires_at: key.expires_at,
                usage_count: 0,
                last_used_at: None,
                active: true,
            },
        );
    }

    /// Bump usage accounting for a key that just served a successful call.
    fn record_usage(&self, uid: &str) {
        if let Some(entry) = self.audit.lock().get_mut(uid) {
            entry.usage_count += 1;
            entry.last_used_at = Some(Utc::now());
        }
    }

    fn record_revoked(&self, uid: &str) {
        if let Some(entry) = self.audit.lock().get_mut(uid) {
            entry.active = false;
        }
    }

    /// Audit-ledger view of one key uid.
    pub fn key_audit(&self, uid: &str) -> Option<IndexKey> {
        self.audit.lock().get(uid).cloned()
    }

    /// All audit records, issued and revoked alike.
    pub fn audit_records(&self) -> Vec<IndexKey> {
        self.audit.lock().values().cloned().collect()
    }

    /// Issue the project-owner search key: `search` + `documents.get` over
    /// the project index, expiring after the rotation window.
    pub async fn create_project_key(&self, project: &Project) -> Result<EngineKey, KeyManagerError> {
        let index_name = project_index_name(project.id);
        let key = self
            .engine
            .create_key(&KeyConfig {
                actions: vec!["search".to_string(), "documents.get".to_string()],
                indexes: vec![index_name],
                expires_at: Some(Utc::now() + Duration::days(self.config.key_rotation_days)),
                name: format!("project_owner_{}", project.id),
                description: format!("Search key for project: {} (Owner Access)", project.name),
            })
            .await?;
        self.record_issued(&key, IndexKeyType::ProjectOwner, Some(project.id));
        info!(project_id = project.id, uid = %key.uid, "created project owner key");
        Ok(key)
    }

    /// Rotate: revoke the current owner key (when present), then create a
    /// fresh one.
    pub async fn rotate_project_key(&self, project: &Project) -> Result<EngineKey, KeyManagerError> {
        if project.index_search_key_uid.is_some() {
            self.revoke_project_key(project).await?;
        }
        let key = self.create_project_key(project).await?;
        info!(project_id = project.id, uid = %key.uid, "rotated project owner key");
        Ok(key)
    }

    /// Revoke the project's owner key. Idempotent: an absent uid reports
    /// `false` instead of failing.
    pub async fn revoke_project_key(&self, project: &Project) -> Result<bool, KeyManagerError> {
        let Some(uid) = project.index_search_key_uid.as_deref() else {
            warn!(project_id = project.id, "no key uid to revoke");
            return Ok(false);
        };
        match self.engine.delete_key(uid).await {
            Ok(()) => {
                self.record_revoked(uid);
                info!(project_id = project.id, uid, "revoked project owner key");
                Ok(true)
            }
            Err(KeyEngineError::NotFound(_)) => {
                self.record_revoked(uid);
                warn!(project_id = project.id, uid, "key already deleted");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Mint a JWT tenant token delegating a slice of the owner key's search
    /// rights, filtered per the share permission. The token is signed HS256
    /// with the master key and expires at the earlier of the share expiry and
    /// `now + tenant_token_ttl_hours`.
    pub fn mint_tenant_token(
        &self,
        project: &Project,
        share: &ProjectShare,
    ) -> Result<String, KeyManagerError> {
        let owner_uid = project
            .index_search_key_uid
            .as_deref()
            .ok_or(KeyManagerError::MissingOwnerKey(project.id))?;

        let mut search_rules = BTreeMap::new();
        search_rules.insert(
            project_index_name(project.id),
            SearchRule {
                filter: permission_filter(share.permission),
            },
        );

        let default_expiry = Utc::now() + Duration::hours(self.config.tenant_token_ttl_hours);
        let expires_at = match share.expires_at {
            Some(share_expiry) => share_expiry.min(default_expiry),
            None => default_expiry,
        };

        let claims = TenantClaims {
            search_rules,
            api_key_uid: owner_uid.to_string(),
            exp: expires_at.timestamp(),
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.master_key.as_bytes()),
        )
        .map_err(|e| KeyManagerError::TokenSigning(e.to_string()))?;

        // A tenant token spends the owner key's search rights.
        self.record_usage(owner_uid);

        info!(
            project_id = project.id,
            permission = ?share.permission,
            exp = claims.exp,
            "minted tenant token"
        );
        Ok(token)
    }

    /// Read-only, non-expiring public key; the rate limit is enforced by an
    /// external limiter.
    pub async fn create_public_key(&self, project: &Project) -> Result<EngineKey, KeyManagerError> {
        let index_name = project_index_name(project.id);
        let key = self
            .engine
            .create_key(&KeyConfig {
                actions: vec!["search".to_string()],
                indexes: vec![index_name],
                expires_at: None,
                name: format!("public_search_project_{}", project.id),
                description: format!("Public search access for project: {}", project.name),
            })
            .await?;
        self.record_issued(&key, IndexKeyType::Public, Some(project.id));
        info!(project_id = project.id, uid = %key.uid, "created public search key");
        Ok(key)
    }

    /// Delete every key whose expiry has passed. Returns the deletion count.
    pub async fn cleanup_expired(&self) -> Result<u64, KeyManagerError> {
        let now = Utc::now();
        let mut deleted = 0u64;
        for key in self.engine.list_keys().await? {
            if !key.is_expired_at(now) {
                continue;
            }
            match self.engine.delete_key(&key.uid).await {
                Ok(()) => {
                    deleted += 1;
                    self.record_revoked(&key.uid);
                    info!(uid = %key.uid, name = ?key.name, "cleaned up expired key");
                }
                Err(KeyEngineError::NotFound(_)) => {
                    self.record_revoked(&key.uid);
                }
                Err(err) => return Err(err.into()),
            }
        }
        info!(deleted, "expired key cleanup finished");
        Ok(deleted)
    }

    pub async fn get_key_status(&self, uid: &str) -> Result<KeyStatus, KeyManagerError> {
        match self.engine.get_key(uid).await {
            Ok(key) => {
                self.record_usage(uid);
                Ok(KeyStatus::Active { key: Box::new(key) })
            }
            Err(KeyEngineError::NotFound(_)) => Ok(KeyStatus::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// Every key scoped to the project's index or carrying its name.
    pub async fn list_project_keys(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<EngineKey>, KeyManagerError> {
        let index_name = project_index_name(project_id);
        let keys = self
            .engine
            .list_keys()
            .await?
            .into_iter()
            .filter(|key| {
                key.indexes.contains(&index_name)
                    || key
                        .name
                        .as_deref()
                        .map(|name| name.ends_with(&format!("_{project_id}")))
                        .unwrap_or(false)
            })
            .collect();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chronoscrape_types::ArchiveSource;
    use jsonwebtoken::{decode, DecodingKey, Validation};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// In-memory key engine double.
    #[derive(Default)]
    struct FakeKeyEngine {
        keys: Mutex<HashMap<String, EngineKey>>,
        counter: Mutex<u32>,
    }

    #[async_trait]
    impl KeyEngine for FakeKeyEngine {
        async fn create_key(&self, config: &KeyConfig) -> Result<EngineKey, KeyEngineError> {
            let mut counter = self.counter.lock();
            *counter += 1;
            let uid = format!("uid-{counter}");
            let key = EngineKey {
                key: format!("key-{counter}"),
                uid: uid.clone(),
                name: Some(config.name.clone()),
                description: Some(config.description.clone()),
                actions: config.actions.clone(),
                indexes: config.indexes.clone(),
                expires_at: config.expires_at,
                created_at: Some(Utc::now()),
                updated_at: None,
            };
            self.keys.lock().insert(uid, key.clone());
            Ok(key)
        }

        async fn delete_key(&self, uid: &str) -> Result<(), KeyEngineError> {
            self.keys
                .lock()
                .remove(uid)
                .map(|_| ())
                .ok_or_else(|| KeyEngineError::NotFound(uid.to_string()))
        }

        async fn get_key(&self, uid: &str) -> Result<EngineKey, KeyEngineError> {
            self.keys
                .lock()
                .get(uid)
                .cloned()
                .ok_or_else(|| KeyEngineError::NotFound(uid.to_string()))
        }

        async fn list_keys(&self) -> Result<Vec<EngineKey>, KeyEngineError> {
            Ok(self.keys.lock().values().cloned().collect())
        }
    }

    fn project(uid: Option<&str>) -> Project {
        Project {
            id: 42,
            name: "archive project".into(),
            index_name: Some("project_42".into()),
            index_search_key_uid: uid.map(String::from),
            archive_source: ArchiveSource::Wayback,
            fallback_enabled: true,
        }
    }

    fn manager(engine: Arc<FakeKeyEngine>) -> IndexKeyManager {
        IndexKeyManager::new(engine, "master-secret", KeyManagerConfig::default())
    }

    #[tokio::test]
    async fn create_key_scopes_actions_and_index() {
        let engine = Arc::new(FakeKeyEngine::default());
        let manager = manager(engine.clone());

        let key = manager.create_project_key(&project(None)).await.unwrap();
        assert_eq!(key.actions, ["search", "documents.get"]);
        assert_eq!(key.indexes, ["project_42"]);
        assert!(key.expires_at.is_some());
        assert_eq!(key.name.as_deref(), Some("project_owner_42"));
    }

    #[tokio::test]
    async fn create_then_revoke_restores_prior_state() {
        let engine = Arc::new(FakeKeyEngine::default());
        let manager = manager(engine.clone());

        let key = manager.create_project_key(&project(None)).await.unwrap();
        let revoked = manager
            .revoke_project_key(&project(Some(&key.uid)))
            .await
            .unwrap();
        assert!(revoked);
        assert!(engine.list_keys().await.unwrap().is_empty());
        // The audit record survives the revocation, flagged inactive.
        assert!(!manager.key_audit(&key.uid).unwrap().active);

        // Second revoke is idempotent.
        let revoked_again = manager
            .revoke_project_key(&project(Some(&key.uid)))
            .await
            .unwrap();
        assert!(!revoked_again);
    }

    #[tokio::test]
    async fn audit_ledger_tracks_issuance_and_usage() {
        let engine = Arc::new(FakeKeyEngine::default());
        let manager = manager(engine);

        let key = manager.create_project_key(&project(None)).await.unwrap();
        let audit = manager.key_audit(&key.uid).unwrap();
        assert_eq!(audit.key_type, IndexKeyType::ProjectOwner);
        assert_eq!(audit.project_id, Some(42));
        assert_eq!(audit.usage_count, 0);
        assert!(audit.last_used_at.is_none());
        assert!(audit.active);

        // Minting a tenant token spends the owner key.
        let share = ProjectShare {
            id: 7,
            project_id: 42,
            permission: SharePermission::Read,
            expires_at: None,
        };
        manager
            .mint_tenant_token(&project(Some(&key.uid)), &share)
            .unwrap();
        manager.get_key_status(&key.uid).await.unwrap();

        let audit = manager.key_audit(&key.uid).unwrap();
        assert_eq!(audit.usage_count, 2);
        assert!(audit.last_used_at.is_some());

        let public = manager.create_public_key(&project(None)).await.unwrap();
        assert_eq!(
            manager.key_audit(&public.uid).unwrap().key_type,
            IndexKeyType::Public
        );
        assert_eq!(manager.audit_records().len(), 2);
    }

    #[tokio::test]
    async fn rotate_replaces_uid() {
        let engine = Arc::new(FakeKeyEngine::default());
        let manager = manager(engine.clone());

        let first = manager.create_project_key(&project(None)).await.unwrap();
        let second = manager
            .rotate_project_key(&project(Some(&first.uid)))
            .await
            .unwrap();
        assert_ne!(first.uid, second.uid);
        let remaining = engine.list_keys().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].uid, second.uid);
    }

    #[test]
    fn tenant_token_round_trips_with_permission_filters() {
        let engine = Arc::new(FakeKeyEngine::default());
        let manager = manager(engine);

        let cases = [
            (SharePermission::Read, None),
            (
                SharePermission::Limited,
                Some("review_status != 'irrelevant'".to_string()),
            ),
            (
                SharePermission::Restricted,
                Some("review_status = 'relevant'".to_string()),
            ),
            (SharePermission::Write, None),
        ];

        for (permission, expected_filter) in cases {
            let share = ProjectShare {
                id: 7,
                project_id: 42,
                permission,
                expires_at: None,
            };
            let token = manager
                .mint_tenant_token(&project(Some("owner-uid")), &share)
                .unwrap();

            let mut validation = Validation::new(Algorithm::HS256);
            validation.set_required_spec_claims(&["exp"]);
            let decoded = decode::<TenantClaims>(
                &token,
                &DecodingKey::from_secret(b"master-secret"),
                &validation,
            )
            .unwrap();

            assert_eq!(decoded.claims.api_key_uid, "owner-uid");
            let rule = &decoded.claims.search_rules["project_42"];
            assert_eq!(rule.filter, expected_filter, "permission {permission:?}");
        }
    }

    #[test]
    fn tenant_token_expiry_is_clamped_to_share() {
        let engine = Arc::new(FakeKeyEngine::default());
        let manager = manager(engine);

        let share_expiry = Utc::now() + Duration::hours(1);
        let share = ProjectShare {
            id: 7,
            project_id: 42,
            permission: SharePermission::Read,
            expires_at: Some(share_expiry),
        };
        let token = manager
            .mint_tenant_token(&project(Some("owner-uid")), &share)
            .unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        let decoded = decode::<TenantClaims>(
            &token,
            &DecodingKey::from_secret(b"master-secret"),
            &validation,
        )
        .unwrap();
        assert_eq!(decoded.claims.exp, share_expiry.timestamp());
    }

    #[test]
    fn tenant_token_requires_owner_key() {
        let engine = Arc::new(FakeKeyEngine::default());
        let manager = manager(engine);
        let share = ProjectShare {
            id: 7,
            project_id: 42,
            permission: SharePermission::Read,
            expires_at: None,
        };
        let err = manager.mint_tenant_token(&project(None), &share).unwrap_err();
        assert!(matches!(err, KeyManagerError::MissingOwnerKey(42)));
    }

    #[tokio::test]
    async fn cleanup_deletes_only_expired_keys() {
        let engine = Arc::new(FakeKeyEngine::default());
        let manager = manager(engine.clone());

        // Active public key, no expiry.
        manager.create_public_key(&project(None)).await.unwrap();
        // Expired key, planted directly.
        engine.keys.lock().insert(
            "expired-uid".into(),
            EngineKey {
                key: "k".into(),
                uid: "expired-uid".into(),
                name: Some("project_owner_42".into()),
                description: None,
                actions: vec!["search".into()],
                indexes: vec!["project_42".into()],
                expires_at: Some(Utc::now() - Duration::days(1)),
                created_at: None,
                updated_at: None,
            },
        );

        let deleted = manager.cleanup_expired().await.unwrap();
        assert_eq!(deleted, 1);
        let remaining = engine.list_keys().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].expires_at.is_none());
    }

    #[tokio::test]
    async fn list_project_keys_filters_by_index() {
        let engine = Arc::new(FakeKeyEngine::default());
        let manager = manager(engine.clone());

        manager.create_project_key(&project(None)).await.unwrap();
        manager.create_public_key(&project(None)).await.unwrap();
        // A key for some other project.
        engine
            .create_key(&KeyConfig {
                actions: vec!["search".into()],
                indexes: vec!["project_99".into()],
                expires_at: None,
                name: "project_owner_99".into(),
                description: String::new(),
            })
            .await
            .unwrap();

        let keys = manager.list_project_keys(42).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.indexes.contains(&"project_42".to_string())));
    }
}
