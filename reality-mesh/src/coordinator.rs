use crate::transport::PeerTransport;
use crate::types::{now_millis, GossipPayload, PeerHealth, PeerInfo, PeerSummary};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Consecutive failures before a peer is marked unhealthy (default 3, §4.2).
    pub unhealthy_after_failures: u32,
    /// Latency above which an exchange counts as "high"; two consecutive
    /// high-latency exchanges demote a healthy peer to degraded.
    pub latency_threshold: Duration,
    /// How long without a successful exchange before a peer's health decays
    /// one step (healthy -> degraded -> unknown).
    pub staleness_window: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Bound on `peerSummaries` length in a gossip payload (§9).
    pub gossip_top_k: usize,
    /// Max concurrent outbound propagation calls.
    pub propagation_concurrency: usize,
    pub peer_timeout: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        MeshConfig {
            unhealthy_after_failures: 3,
            latency_threshold: Duration::from_millis(800),
            staleness_window: Duration::from_secs(90),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            gossip_top_k: 16,
            propagation_concurrency: 8,
            peer_timeout: Duration::from_secs(3),
        }
    }
}

/// Tracks peer health, propagates invalidations, and builds/ingests gossip
/// (§4.2). Cheap to clone — internals are `Arc`-backed, so a clone can be
/// moved into a spawned propagation task without the caller needing to wrap
/// the whole coordinator in an `Arc` itself.
#[derive(Clone)]
pub struct MeshCoordinator {
    server_id: Arc<str>,
    peers: Arc<RwLock<HashMap<String, PeerInfo>>>,
    config: Arc<MeshConfig>,
}

/// Mesh view attached to a `SyncResponse`/`HealthResponse` (§3).
pub struct MeshSnapshot {
    pub peers: HashMap<String, PeerHealth>,
    pub healthy_peer_count: usize,
    pub peer_count: usize,
}

fn health_rank(h: PeerHealth) -> u8 {
    match h {
        PeerHealth::Healthy => 3,
        PeerHealth::Degraded => 2,
        PeerHealth::Unhealthy => 1,
        PeerHealth::Unknown => 0,
    }
}

impl MeshCoordinator {
    pub fn new(
        server_id: impl Into<String>,
        peer_urls: impl IntoIterator<Item = String>,
        config: MeshConfig,
    ) -> Self {
        let mut peers = HashMap::new();
        for url in peer_urls {
            peers.insert(url.clone(), PeerInfo::new(url));
        }
        MeshCoordinator {
            server_id: Arc::from(server_id.into()),
            peers: Arc::new(RwLock::new(peers)),
            config: Arc::new(config),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn is_self_source(&self, source: &str) -> bool {
        source == &*self.server_id
    }

    fn backoff_for(&self, consecutive_failures: u32) -> Duration {
        use rand::Rng;
        let over = consecutive_failures.saturating_sub(self.config.unhealthy_after_failures);
        let millis = self.config.backoff_base.as_millis().saturating_mul(1u128 << over.min(16));
        let capped = millis.min(self.config.backoff_max.as_millis()) as u64;
        // Jitter the retry so many peers recovering from the same outage don't
        // all hammer this server on the same tick.
        let jittered = rand::thread_rng().gen_range((capped / 2).max(1)..=capped.max(1));
        Duration::from_millis(jittered)
    }

    /// Record a successful exchange (gossip, invalidation, or direct sync).
    pub fn record_success(&self, url: &str, latency: Duration) {
        let mut peers = self.peers.write();
        let peer = peers.entry(url.to_string()).or_insert_with(|| PeerInfo::new(url.to_string()));
        peer.last_seen_millis = now_millis();
        peer.last_latency = Some(latency);
        peer.consecutive_failures = 0;
        peer.next_retry_at_millis = 0;
        if latency > self.config.latency_threshold {
            peer.consecutive_high_latency += 1;
        } else {
            peer.consecutive_high_latency = 0;
        }
        peer.health =
            if peer.consecutive_high_latency >= 2 { PeerHealth::Degraded } else { PeerHealth::Healthy };
        peer.direct = true;
    }

    /// Record a failed exchange.
    pub fn record_failure(&self, url: &str) {
        let mut peers = self.peers.write();
        let peer = peers.entry(url.to_string()).or_insert_with(|| PeerInfo::new(url.to_string()));
        let was_healthy = peer.health == PeerHealth::Healthy;
        peer.consecutive_failures += 1;
        peer.direct = true;
        if peer.consecutive_failures >= self.config.unhealthy_after_failures {
            peer.health = PeerHealth::Unhealthy;
            peer.next_retry_at_millis = now_millis() + self.backoff_for(peer.consecutive_failures).as_millis() as u64;
        } else if was_healthy {
            peer.health = PeerHealth::Degraded;
        }
    }

    /// Decays peers that haven't been heard from within the staleness
    /// window. Intended to be called on a periodic tick by the owning
    /// server process, not internally scheduled by this type (§9: explicit
    /// process-lifetime wiring over hidden background tasks).
    pub fn decay_stale_peers(&self) {
        let now = now_millis();
        let window_millis = self.config.staleness_window.as_millis() as u64;
        let mut peers = self.peers.write();
        for peer in peers.values_mut() {
            if now.saturating_sub(peer.last_seen_millis) < window_millis {
                continue;
            }
            peer.health = match peer.health {
                PeerHealth::Healthy => PeerHealth::Degraded,
                PeerHealth::Degraded => PeerHealth::Unknown,
                other => other,
            };
            peer.direct = false;
        }
    }

    /// Merges a peer's gossip into our own view, last-writer-wins by
    /// `(url, lastSeen)`, refusing to let gossip downgrade a health state we
    /// observed directly and more recently (§4.2).
    pub fn observe_gossip(&self, payload: &GossipPayload) {
        if payload.server_id == &*self.server_id {
            return;
        }
        let mut peers = self.peers.write();
        for summary in &payload.peer_summaries {
            if summary.url == &*self.server_id {
                continue;
            }
            let entry = peers.entry(summary.url.clone()).or_insert_with(|| PeerInfo::new(summary.url.clone()));
            if summary.last_seen_millis <= entry.last_seen_millis {
                continue;
            }
            entry.last_seen_millis = summary.last_seen_millis;
            entry.max_version_seen = entry.max_version_seen.max(summary.max_version_seen);
            if summary.server_id.is_some() {
                entry.server_id = summary.server_id.clone();
            }
            if !entry.direct || health_rank(summary.health) >= health_rank(entry.health) {
                entry.health = summary.health;
            }
        }
    }

    pub fn record_peer_max_version(&self, url: &str, version: u64) {
        let mut peers = self.peers.write();
        let peer = peers.entry(url.to_string()).or_insert_with(|| PeerInfo::new(url.to_string()));
        peer.max_version_seen = peer.max_version_seen.max(version);
    }

    pub fn snapshot(&self) -> MeshSnapshot {
        let peers = self.peers.read();
        let map: HashMap<String, PeerHealth> = peers.iter().map(|(k, v)| (k.clone(), v.health)).collect();
        let healthy = map.values().filter(|h| **h == PeerHealth::Healthy).count();
        MeshSnapshot { healthy_peer_count: healthy, peer_count: map.len(), peers: map }
    }

    /// Builds the gossip payload piggybacked on sync/invalidation responses.
    pub fn build_gossip(&self, max_version: u64) -> GossipPayload {
        let peers = self.peers.read();
        let mut summaries: Vec<PeerSummary> = peers
            .values()
            .map(|p| PeerSummary {
                url: p.url.clone(),
                server_id: p.server_id.clone(),
                health: p.health,
                max_version_seen: p.max_version_seen,
                last_seen_millis: p.last_seen_millis,
            })
            .collect();
        summaries.sort_by(|a, b| b.last_seen_millis.cmp(&a.last_seen_millis));
        summaries.truncate(self.config.gossip_top_k);
        GossipPayload {
            server_id: self.server_id.to_string(),
            max_version,
            peer_summaries: summaries,
            timestamp: now_millis(),
        }
    }

    /// Fire-and-forget propagation to every healthy/degraded peer, except
    /// (when set) `received_from` — the server id an inbound invalidation
    /// claimed as its source, so we don't bounce it straight back where it
    /// came from (§4.2, S6). Returns immediately; the actual pushes run as a
    /// detached task so the local write path is never blocked on peer I/O.
    pub fn propagate_invalidation(
        &self,
        keys: Vec<String>,
        source: String,
        received_from: Option<&str>,
        transport: Arc<dyn PeerTransport>,
    ) {
        let targets: Vec<String> = {
            let peers = self.peers.read();
            peers
                .values()
                .filter(|p| matches!(p.health, PeerHealth::Healthy | PeerHealth::Degraded))
                .filter(|p| received_from.is_none() || p.server_id.as_deref() != received_from)
                .map(|p| p.url.clone())
                .collect()
        };
        if targets.is_empty() {
            return;
        }
        let mesh = self.clone();
        tokio::spawn(async move {
            let semaphore = Arc::new(tokio::sync::Semaphore::new(mesh.config.propagation_concurrency));
            let mut joins = Vec::with_capacity(targets.len());
            for peer_url in targets {
                let permit = semaphore.clone();
                let transport = transport.clone();
                let keys = keys.clone();
                let source = source.clone();
                let mesh = mesh.clone();
                joins.push(tokio::spawn(async move {
                    let _permit = permit.acquire_owned().await.ok();
                    let started = Instant::now();
                    let timestamp = now_millis();
                    let result = tokio::time::timeout(
                        mesh.config.peer_timeout,
                        transport.send_invalidate(&peer_url, &keys, &source, timestamp),
                    )
                    .await;
                    match result {
                        Ok(Ok(())) => mesh.record_success(&peer_url, started.elapsed()),
                        _ => mesh.record_failure(&peer_url),
                    }
                }));
            }
            futures::future::join_all(joins).await;
        });
    }

    /// Peers currently `unhealthy` whose backoff window has elapsed.
    fn peers_due_for_retry(&self) -> Vec<String> {
        let now = now_millis();
        let peers = self.peers.read();
        peers
            .values()
            .filter(|p| p.health == PeerHealth::Unhealthy && p.retry_due(now))
            .map(|p| p.url.clone())
            .collect()
    }

    /// Re-contacts every `unhealthy` peer whose retry is due (§4.2: "An
    /// unhealthy peer is retried on a capped exponential-backoff schedule;
    /// success resets to healthy"). Intended to be called on a periodic tick
    /// by the owning server process, alongside [`Self::decay_stale_peers`].
    pub fn retry_unhealthy_peers(&self, transport: Arc<dyn PeerTransport>) {
        let targets = self.peers_due_for_retry();
        if targets.is_empty() {
            return;
        }
        let mesh = self.clone();
        tokio::spawn(async move {
            let semaphore = Arc::new(tokio::sync::Semaphore::new(mesh.config.propagation_concurrency));
            let mut joins = Vec::with_capacity(targets.len());
            for peer_url in targets {
                let permit = semaphore.clone();
                let transport = transport.clone();
                let mesh = mesh.clone();
                joins.push(tokio::spawn(async move {
                    let _permit = permit.acquire_owned().await.ok();
                    let started = Instant::now();
                    let result = tokio::time::timeout(mesh.config.peer_timeout, transport.ping(&peer_url)).await;
                    match result {
                        Ok(Ok(())) => mesh.record_success(&peer_url, started.elapsed()),
                        _ => mesh.record_failure(&peer_url),
                    }
                }));
            }
            futures::future::join_all(joins).await;
        });
    }
}
