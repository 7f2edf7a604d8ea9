use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Per-peer health, rate-limited per the state machine in spec.md §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl Default for PeerHealth {
    fn default() -> Self {
        PeerHealth::Unknown
    }
}

/// One configured peer URL's tracked state.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub url: String,
    pub server_id: Option<String>,
    pub health: PeerHealth,
    pub max_version_seen: u64,
    pub last_seen_millis: u64,
    pub last_latency: Option<Duration>,
    pub(crate) consecutive_failures: u32,
    pub(crate) consecutive_high_latency: u32,
    pub(crate) next_retry_at_millis: u64,
    /// Whether `health` reflects our own last exchange with this peer, as
    /// opposed to a value merged in from another peer's gossip.
    pub(crate) direct: bool,
}

impl PeerInfo {
    pub fn new(url: String) -> Self {
        PeerInfo {
            url,
            server_id: None,
            health: PeerHealth::Unknown,
            max_version_seen: 0,
            last_seen_millis: 0,
            last_latency: None,
            consecutive_failures: 0,
            consecutive_high_latency: 0,
            next_retry_at_millis: 0,
            direct: false,
        }
    }

    /// Whether a retry attempt is due, for peers currently unhealthy.
    pub fn retry_due(&self, now_millis: u64) -> bool {
        self.health != PeerHealth::Unhealthy || now_millis >= self.next_retry_at_millis
    }
}

/// A peer's view of another peer, as carried in [`GossipPayload::peer_summaries`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSummary {
    pub url: String,
    pub server_id: Option<String>,
    pub health: PeerHealth,
    pub max_version_seen: u64,
    pub last_seen_millis: u64,
}

/// Compact snapshot piggybacked on sync/invalidation responses (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipPayload {
    pub server_id: String,
    pub max_version: u64,
    pub peer_summaries: Vec<PeerSummary>,
    pub timestamp: u64,
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
