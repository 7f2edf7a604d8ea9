use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How this server pushes invalidations outward (§6 configuration surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationMode {
    /// This server never pushes invalidations out: no mesh propagation, no
    /// Redis publish. Writes still bump a version locally; peers only learn
    /// of them by polling `/sync`/`/versions`.
    None,
    /// Default: propagate to the mesh and publish Redis hints, best-effort
    /// and non-authoritative.
    Advisory,
    /// An external system (e.g. a CDC pipeline) is responsible for fanning
    /// invalidations out; this server accepts and serves them but does not
    /// push its own writes to peers or Redis.
    External,
}

impl Default for InvalidationMode {
    fn default() -> Self {
        InvalidationMode::Advisory
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    Native,
    SseCompat,
    PollingCompat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncHint {
    Interaction,
    Focus,
    Idle,
    Mutation,
    Mount,
    Reconnect,
}

/// `POST /sync` request body (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct SyncRequest {
    pub known: HashMap<String, u64>,
    #[serde(rename = "clientId")]
    pub client_id: uuid::Uuid,
    #[serde(default = "default_mode")]
    pub mode: SyncMode,
    pub hint: Option<SyncHint>,
    pub timestamp: Option<u64>,
}

fn default_mode() -> SyncMode {
    SyncMode::Native
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangedEntry {
    pub version: u64,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeshView {
    pub peers: HashMap<String, String>,
    #[serde(rename = "serverVersion", skip_serializing_if = "Option::is_none")]
    pub server_version: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResponse {
    pub changed: HashMap<String, ChangedEntry>,
    pub mesh: MeshView,
    #[serde(rename = "serverTime")]
    pub server_time: u64,
}

/// `POST /invalidate` request body (§4.4.2).
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidationRequest {
    pub keys: Vec<String>,
    pub source: Option<String>,
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvalidationResponse {
    pub invalidated: Vec<String>,
    pub versions: HashMap<String, u64>,
}

/// `POST /update` request body (§4.4.3).
#[derive(Debug, Clone, Deserialize)]
pub struct NodeUpdateRequest {
    pub key: String,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeUpdateResponse {
    pub key: String,
    pub version: u64,
    pub hash: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionsEntry {
    pub key: String,
    pub version: u64,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionsResponse {
    #[serde(flatten)]
    pub gossip: reality_mesh::GossipPayload,
    pub changed: Vec<VersionsEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeshHealth {
    #[serde(rename = "peerCount")]
    pub peer_count: usize,
    #[serde(rename = "healthyPeers")]
    pub healthy_peers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageHealth {
    pub healthy: bool,
    #[serde(rename = "maxVersion")]
    pub max_version: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(rename = "serverId")]
    pub server_id: String,
    pub version: u64,
    pub uptime: u64,
    pub mesh: MeshHealth,
    pub storage: StorageHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub error: String,
}
