//! Secure multi-tenant key management for the search engine.
//!
//! Four tiers: the master key (admin only, never handed to request paths),
//! per-project owner keys, short-lived JWT tenant tokens minted for shares,
//! and rate-limited public keys. The engine's key-admin API stays behind the
//! `KeyEngine` port; this crate owns the lifecycle and the token format.

mod manager;

pub use manager::{
    project_index_name, IndexKeyManager, KeyManagerConfig, KeyManagerError, KeyStatus, SearchRule,
    TenantClaims,
};
