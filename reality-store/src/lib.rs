//! The versioned node store.
//!
//! [`StorageAdapter`] is the narrow interface every backend implements;
//! [`memory::MemoryStore`] and [`sql::SqlStore`] are the two concrete
//! adapters this workspace ships (§2, §4.1 of the spec). Version bumps are
//! server-global: `incrementVersion` assigns `MAX(version over all keys) + 1`,
//! never a per-key counter (frozen open question, see DESIGN.md).

pub mod memory;
pub mod sql;

use reality_hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("storage is unavailable")]
    Unavailable,
}

/// The central record tracked per key (data model §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub key: String,
    pub version: u64,
    pub hash: ContentHash,
    /// Wall-clock milliseconds at the version bump. Advisory only — never
    /// compared for ordering (§9c).
    pub updated_at: u64,
}

impl NodeMeta {
    /// The sentinel returned for a key this server has never seen (I5).
    pub fn unknown(key: &str) -> NodeMeta {
        NodeMeta { key: key.to_string(), version: 0, hash: ContentHash::EMPTY, updated_at: 0 }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Narrow storage contract every backend must satisfy (§4.1).
///
/// `increment_version` must be linearizable with respect to concurrent
/// calls on the same backing store (P1, P5): no two concurrent calls may
/// observe or return the same version.
#[async_trait::async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn get_node(&self, key: &str) -> Result<Option<NodeMeta>, StoreError>;

    /// Missing keys are simply absent from the returned map, never `null`
    /// entries.
    async fn get_nodes(&self, keys: &[String]) -> Result<HashMap<String, NodeMeta>, StoreError>;

    async fn increment_version(&self, key: &str, hash: ContentHash) -> Result<NodeMeta, StoreError>;

    /// Explicit upsert that does not go through the version counter; used
    /// by administrative tooling and tests, not by the sync protocol.
    async fn set_node(&self, key: &str, version: u64, hash: ContentHash) -> Result<NodeMeta, StoreError>;

    /// Ordered ascending by version (I4/P4).
    async fn list_changed_since(&self, version: u64) -> Result<Vec<NodeMeta>, StoreError>;

    async fn get_max_version(&self) -> Result<u64, StoreError>;

    async fn delete_node(&self, key: &str) -> Result<(), StoreError>;

    async fn is_healthy(&self) -> bool;
}
