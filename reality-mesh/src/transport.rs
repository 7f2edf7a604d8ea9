use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("peer transport error: {0}")]
    Transport(String),
}

/// Outbound side of peer-to-peer communication, isolated behind a trait so
/// the health state machine and propagation logic in [`crate::coordinator`]
/// can be exercised without a real network (§4.2).
#[async_trait::async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send_invalidate(
        &self,
        peer_url: &str,
        keys: &[String],
        source: &str,
        timestamp: u64,
    ) -> Result<(), MeshError>;

    /// Lightweight re-contact probe used to retry an `unhealthy` peer on its
    /// backoff schedule (§4.2). Does not carry any invalidation payload.
    async fn ping(&self, peer_url: &str) -> Result<(), MeshError>;
}

/// `awc`-based transport used in production, POSTing to a peer's
/// `/invalidate` route (§6).
pub struct HttpPeerTransport {
    client: awc::Client,
    timeout: Duration,
}

impl HttpPeerTransport {
    pub fn new(timeout: Duration) -> Self {
        HttpPeerTransport { client: awc::Client::new(), timeout }
    }
}

impl Default for HttpPeerTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[derive(serde::Serialize)]
struct InvalidateBody<'a> {
    keys: &'a [String],
    source: &'a str,
    timestamp: u64,
}

#[async_trait::async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn send_invalidate(
        &self,
        peer_url: &str,
        keys: &[String],
        source: &str,
        timestamp: u64,
    ) -> Result<(), MeshError> {
        let url = format!("{}/invalidate", peer_url.trim_end_matches('/'));
        let body = InvalidateBody { keys, source, timestamp };
        let mut res = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .send_json(&body)
            .await
            .map_err(|e| MeshError::Transport(e.to_string()))?;
        if res.status().is_success() {
            let _ = res.body().await;
            Ok(())
        } else {
            Err(MeshError::Transport(format!("peer {url} responded with {}", res.status())))
        }
    }

    async fn ping(&self, peer_url: &str) -> Result<(), MeshError> {
        let url = format!("{}/health", peer_url.trim_end_matches('/'));
        let mut res = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| MeshError::Transport(e.to_string()))?;
        if res.status().is_success() {
            let _ = res.body().await;
            Ok(())
        } else {
            Err(MeshError::Transport(format!("peer {url} responded with {}", res.status())))
        }
    }
}
