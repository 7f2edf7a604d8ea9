//! Framework-agnostic sync protocol handlers (§4.4). These operate purely on
//! this crate's request/response value types; `reality`/`realityd` adapt
//! them to an actual HTTP framework.

use crate::error::ProtocolError;
use crate::types::{
    ChangedEntry, HealthResponse, HealthStatus, InvalidationMode, InvalidationRequest, InvalidationResponse,
    MeshHealth, MeshView, NodeUpdateRequest, NodeUpdateResponse, StorageHealth, SyncRequest, SyncResponse,
    VersionsEntry, VersionsResponse,
};
use reality_hash::ContentHash;
use reality_mesh::{GossipPayload, MeshCoordinator, PeerHealth, PeerTransport};
use reality_redis::RedisAccelerator;
use reality_store::StorageAdapter;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn health_to_str(h: PeerHealth) -> String {
    match h {
        PeerHealth::Healthy => "healthy".to_string(),
        PeerHealth::Degraded => "degraded".to_string(),
        PeerHealth::Unhealthy => "unhealthy".to_string(),
        PeerHealth::Unknown => "unknown".to_string(),
    }
}

/// Hook for inlining payloads into `changed` entries on `/sync` (§4.4.1 step
/// 4). Optional: a deployment that only needs invalidation, not inlining,
/// never configures one.
#[async_trait::async_trait]
pub trait PayloadFetcher: Send + Sync {
    async fn fetch(&self, key: &str) -> Option<serde_json::Value>;
}

pub struct SyncHandlerConfig {
    /// Inline a payload only if its serialized size is below this many
    /// bytes (§9a, frozen at 1024).
    pub inline_threshold_bytes: usize,
    /// Governs whether this server pushes its own writes/invalidations out
    /// to the mesh and Redis, or leaves that to an external mechanism.
    pub invalidation_mode: InvalidationMode,
}

impl Default for SyncHandlerConfig {
    fn default() -> Self {
        SyncHandlerConfig { inline_threshold_bytes: 1024, invalidation_mode: InvalidationMode::default() }
    }
}

/// Bundles the collaborators every sync-protocol route needs. Constructed
/// once per process and shared via `Arc` (§9's process-lifetime registry
/// note), not stashed in a module-level global.
pub struct SyncHandler {
    pub server_id: String,
    pub store: Arc<dyn StorageAdapter>,
    pub mesh: MeshCoordinator,
    pub transport: Arc<dyn PeerTransport>,
    pub redis: Option<Arc<RedisAccelerator>>,
    pub payload_fetcher: Option<Arc<dyn PayloadFetcher>>,
    pub config: SyncHandlerConfig,
    started_at: Instant,
}

impl SyncHandler {
    pub fn new(
        server_id: impl Into<String>,
        store: Arc<dyn StorageAdapter>,
        mesh: MeshCoordinator,
        transport: Arc<dyn PeerTransport>,
        redis: Option<Arc<RedisAccelerator>>,
        payload_fetcher: Option<Arc<dyn PayloadFetcher>>,
        config: SyncHandlerConfig,
    ) -> Self {
        SyncHandler {
            server_id: server_id.into(),
            store,
            mesh,
            transport,
            redis,
            payload_fetcher,
            config,
            started_at: Instant::now(),
        }
    }

    fn mesh_view(&self, server_version: u64) -> MeshView {
        let snapshot = self.mesh.snapshot();
        MeshView {
            peers: snapshot.peers.into_iter().map(|(url, h)| (url, health_to_str(h))).collect(),
            server_version: Some(server_version),
        }
    }

    pub fn gossip(&self, max_version: u64) -> GossipPayload {
        self.mesh.build_gossip(max_version)
    }

    pub async fn current_max_version(&self) -> Result<u64, ProtocolError> {
        Ok(self.store.get_max_version().await?)
    }

    /// `POST /sync` (§4.4.1).
    pub async fn handle_sync(&self, req: SyncRequest) -> Result<SyncResponse, ProtocolError> {
        let keys: Vec<String> = req.known.keys().cloned().collect();
        let found = self.store.get_nodes(&keys).await?;

        let mut changed = std::collections::HashMap::new();
        for (key, client_version) in &req.known {
            match found.get(key) {
                None => {
                    changed.insert(
                        key.clone(),
                        ChangedEntry { version: 0, hash: String::new(), source: None, payload: None },
                    );
                }
                Some(meta) if meta.version > *client_version => {
                    let mut payload = None;
                    if let Some(fetcher) = &self.payload_fetcher {
                        if let Some(value) = fetcher.fetch(key).await {
                            let size = serde_json::to_vec(&value).map(|b| b.len()).unwrap_or(usize::MAX);
                            if size < self.config.inline_threshold_bytes {
                                payload = Some(value);
                            }
                        }
                    }
                    changed.insert(
                        key.clone(),
                        ChangedEntry {
                            version: meta.version,
                            hash: meta.hash.to_hex(),
                            source: Some(self.server_id.clone()),
                            payload,
                        },
                    );
                }
                Some(_) => {}
            }
        }

        let max_version = self.store.get_max_version().await?;
        Ok(SyncResponse { changed, mesh: self.mesh_view(max_version), server_time: now_millis() })
    }

    /// `POST /invalidate` (§4.4.2). Never bumps a version; a foreign
    /// `source` triggers propagation, a self `source` is dropped (P7/S6).
    pub async fn handle_invalidate(&self, req: InvalidationRequest) -> Result<InvalidationResponse, ProtocolError> {
        if req.keys.is_empty() {
            return Err(ProtocolError::Validation("keys must not be empty".to_string()));
        }
        if let Some(source) = &req.source {
            if self.mesh.is_self_source(source) {
                return Ok(InvalidationResponse { invalidated: Vec::new(), versions: std::collections::HashMap::new() });
            }
        }

        let found = self.store.get_nodes(&req.keys).await?;
        let mut versions = std::collections::HashMap::new();
        for key in &req.keys {
            versions.insert(key.clone(), found.get(key).map(|m| m.version).unwrap_or(0));
        }

        if self.config.invalidation_mode != InvalidationMode::None {
            if let Some(redis) = &self.redis {
                redis.publish_invalidation(req.keys.clone(), now_millis()).await;
            }
        }
        if self.config.invalidation_mode == InvalidationMode::Advisory {
            if let Some(source) = &req.source {
                // source was verified foreign above; never bounce the invalidation
                // back to the peer that just sent it (§4.2, S6).
                self.mesh.propagate_invalidation(
                    req.keys.clone(),
                    self.server_id.clone(),
                    Some(source.as_str()),
                    self.transport.clone(),
                );
            }
        }

        Ok(InvalidationResponse { invalidated: req.keys, versions })
    }

    /// `POST /update` (§4.4.3): the sole entry point that advances a version.
    pub async fn handle_update(&self, req: NodeUpdateRequest) -> Result<NodeUpdateResponse, ProtocolError> {
        if req.key.is_empty() {
            return Err(ProtocolError::Validation("key must not be empty".to_string()));
        }
        if req.hash.is_empty() {
            return Err(ProtocolError::Validation("hash must not be empty".to_string()));
        }
        let hash = ContentHash::try_from(req.hash)
            .map_err(|e| ProtocolError::Validation(format!("invalid hash: {e}")))?;
        let meta = self.store.increment_version(&req.key, hash).await?;

        if self.config.invalidation_mode != InvalidationMode::None {
            if let Some(redis) = &self.redis {
                redis.invalidate_cached(&req.key).await;
                redis.publish_invalidation(vec![req.key.clone()], meta.updated_at).await;
            }
        }
        if self.config.invalidation_mode == InvalidationMode::Advisory {
            self.mesh.propagate_invalidation(vec![req.key.clone()], self.server_id.clone(), None, self.transport.clone());
        }

        Ok(NodeUpdateResponse { key: meta.key, version: meta.version, hash: meta.hash.to_hex(), updated_at: meta.updated_at })
    }

    /// `GET /versions?since=V` (§4.4.4).
    pub async fn handle_versions(&self, since: u64) -> Result<VersionsResponse, ProtocolError> {
        let changed = self.store.list_changed_since(since).await?;
        let max_version = self.store.get_max_version().await?;
        Ok(VersionsResponse {
            gossip: self.gossip(max_version),
            changed: changed
                .into_iter()
                .map(|n| VersionsEntry { key: n.key, version: n.version, hash: n.hash.to_hex() })
                .collect(),
        })
    }

    /// `GET /health` (§4.4.5).
    pub async fn handle_health(&self) -> HealthResponse {
        let storage_healthy = self.store.is_healthy().await;
        let max_version = self.store.get_max_version().await.unwrap_or(0);
        let snapshot = self.mesh.snapshot();

        let status = if !storage_healthy {
            HealthStatus::Unhealthy
        } else if snapshot.peer_count > 0 && snapshot.healthy_peer_count == 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthResponse {
            status,
            server_id: self.server_id.clone(),
            version: max_version,
            uptime: self.started_at.elapsed().as_secs(),
            mesh: MeshHealth { peer_count: snapshot.peer_count, healthy_peers: snapshot.healthy_peer_count },
            storage: StorageHealth { healthy: storage_healthy, max_version },
            redis: self.redis.as_ref().map(|_| true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reality_mesh::{MeshConfig, MeshError};
    use reality_store::memory::MemoryStore;
    use std::collections::HashMap as Map;

    struct NoopTransport;
    #[async_trait::async_trait]
    impl PeerTransport for NoopTransport {
        async fn send_invalidate(&self, _peer_url: &str, _keys: &[String], _source: &str, _timestamp: u64) -> Result<(), MeshError> {
            Ok(())
        }

        async fn ping(&self, _peer_url: &str) -> Result<(), MeshError> {
            Ok(())
        }
    }

    fn handler(server_id: &str) -> SyncHandler {
        SyncHandler::new(
            server_id,
            Arc::new(MemoryStore::new()),
            MeshCoordinator::new(server_id, [], MeshConfig::default()),
            Arc::new(NoopTransport),
            None,
            None,
            SyncHandlerConfig::default(),
        )
    }

    struct CountingTransport(Arc<std::sync::atomic::AtomicUsize>);
    #[async_trait::async_trait]
    impl PeerTransport for CountingTransport {
        async fn send_invalidate(&self, _peer_url: &str, _keys: &[String], _source: &str, _timestamp: u64) -> Result<(), MeshError> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        async fn ping(&self, _peer_url: &str) -> Result<(), MeshError> {
            Ok(())
        }
    }

    fn handler_with_mode(server_id: &str, mode: InvalidationMode, calls: Arc<std::sync::atomic::AtomicUsize>) -> SyncHandler {
        let mesh = MeshCoordinator::new(server_id, ["http://peer".to_string()], MeshConfig::default());
        mesh.record_success("http://peer", std::time::Duration::from_millis(1));
        SyncHandler::new(
            server_id,
            Arc::new(MemoryStore::new()),
            mesh,
            Arc::new(CountingTransport(calls)),
            None,
            None,
            SyncHandlerConfig { invalidation_mode: mode, ..SyncHandlerConfig::default() },
        )
    }

    #[tokio::test]
    async fn fresh_client_learns_a_key() {
        let h = handler("server-1");
        let updated = h.handle_update(NodeUpdateRequest { key: "posts".into(), hash: "abc".into() }).await.unwrap();
        assert_eq!(updated.version, 1);

        let mut known = Map::new();
        known.insert("posts".to_string(), 0u64);
        let resp = h
            .handle_sync(SyncRequest {
                known,
                client_id: uuid::Uuid::new_v4(),
                mode: crate::types::SyncMode::Native,
                hint: Some(crate::types::SyncHint::Mount),
                timestamp: None,
            })
            .await
            .unwrap();
        let entry = &resp.changed["posts"];
        assert_eq!(entry.version, 1);
        assert_eq!(entry.source.as_deref(), Some("server-1"));
        assert_eq!(resp.mesh.server_version, Some(1));
    }

    #[tokio::test]
    async fn up_to_date_client_sees_no_changes() {
        let h = handler("server-1");
        h.handle_update(NodeUpdateRequest { key: "posts".into(), hash: "abc".into() }).await.unwrap();
        let mut known = Map::new();
        known.insert("posts".to_string(), 1u64);
        let resp = h
            .handle_sync(SyncRequest { known, client_id: uuid::Uuid::new_v4(), mode: crate::types::SyncMode::Native, hint: None, timestamp: None })
            .await
            .unwrap();
        assert!(resp.changed.is_empty());
        assert_eq!(resp.mesh.server_version, Some(1));
    }

    #[tokio::test]
    async fn unknown_key_returns_sentinel() {
        let h = handler("server-1");
        let mut known = Map::new();
        known.insert("ghost".to_string(), 5u64);
        let resp = h
            .handle_sync(SyncRequest { known, client_id: uuid::Uuid::new_v4(), mode: crate::types::SyncMode::Native, hint: None, timestamp: None })
            .await
            .unwrap();
        let entry = &resp.changed["ghost"];
        assert_eq!(entry.version, 0);
        assert_eq!(entry.hash, "");
        assert!(entry.source.is_none());
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() {
        let h = handler("server-1");
        h.handle_update(NodeUpdateRequest { key: "posts".into(), hash: "abc".into() }).await.unwrap();
        let first = h.handle_invalidate(InvalidationRequest { keys: vec!["posts".into()], source: None, timestamp: None }).await.unwrap();
        let second = h.handle_invalidate(InvalidationRequest { keys: vec!["posts".into()], source: None, timestamp: None }).await.unwrap();
        assert_eq!(first.versions, second.versions);
        assert_eq!(first.invalidated, second.invalidated);
        let max = h.store.get_max_version().await.unwrap();
        assert_eq!(max, 1, "invalidate must never bump a version");
    }

    #[tokio::test]
    async fn self_sourced_invalidation_is_dropped() {
        let h = handler("server-1");
        let resp = h
            .handle_invalidate(InvalidationRequest { keys: vec!["posts".into()], source: Some("server-1".into()), timestamp: None })
            .await
            .unwrap();
        assert!(resp.invalidated.is_empty());
        assert!(resp.versions.is_empty());
    }

    #[tokio::test]
    async fn empty_known_map_returns_empty_changed() {
        let h = handler("server-1");
        let resp = h
            .handle_sync(SyncRequest { known: Map::new(), client_id: uuid::Uuid::new_v4(), mode: crate::types::SyncMode::Native, hint: None, timestamp: None })
            .await
            .unwrap();
        assert!(resp.changed.is_empty());
    }

    #[tokio::test]
    async fn advisory_mode_propagates_to_mesh() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let h = handler_with_mode("server-1", InvalidationMode::Advisory, calls.clone());
        h.handle_update(NodeUpdateRequest { key: "posts".into(), hash: "abc".into() }).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn none_mode_never_propagates() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let h = handler_with_mode("server-1", InvalidationMode::None, calls.clone());
        h.handle_update(NodeUpdateRequest { key: "posts".into(), hash: "abc".into() }).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn external_mode_does_not_propagate_to_mesh() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let h = handler_with_mode("server-1", InvalidationMode::External, calls.clone());
        h.handle_update(NodeUpdateRequest { key: "posts".into(), hash: "abc".into() }).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn health_reports_storage_state() {
        let h = handler("server-1");
        let health = h.handle_health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.storage.healthy);
    }
}
