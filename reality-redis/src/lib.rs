//! Optional Redis accelerator (spec.md §4.3): a best-effort metadata cache
//! plus a pub/sub invalidation hint channel. Redis is never authoritative —
//! every method here swallows its own errors (logging and moving on) rather
//! than surfacing them to callers, since the node store remains correct with
//! or without this crate in the loop.

use futures::StreamExt;
use reality_hash::ContentHash;
use reality_store::NodeMeta;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedisError {
    #[error("redis error: {0}")]
    Client(#[from] redis::RedisError),
    #[error("malformed cached payload: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("corrupt cached hash")]
    CorruptHash,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    /// Prefix applied to every key this crate touches, e.g. `reality:`.
    pub key_prefix: String,
    pub node_ttl: Duration,
    pub invalidation_channel: String,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        RedisConfig {
            url: url.into(),
            key_prefix: "reality:".to_string(),
            node_ttl: Duration::from_secs(300),
            invalidation_channel: "reality:invalidations".to_string(),
        }
    }
}

/// Hint broadcast over the invalidation channel. Carries `source` so
/// subscribers can filter out their own publications (§4.3, loop
/// prevention shared with the mesh's P7 property).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationHint {
    pub keys: Vec<String>,
    pub source: String,
    pub timestamp: u64,
}

#[derive(Serialize, Deserialize)]
struct CachedNode {
    version: u64,
    hash: String,
    updated_at: u64,
}

pub struct RedisAccelerator {
    client: redis::Client,
    config: RedisConfig,
    server_id: String,
}

impl RedisAccelerator {
    pub fn connect(config: RedisConfig, server_id: impl Into<String>) -> Result<Self, RedisError> {
        let client = redis::Client::open(config.url.as_str())?;
        Ok(RedisAccelerator { client, config, server_id: server_id.into() })
    }

    fn node_key(&self, key: &str) -> String {
        format!("{}node:{}", self.config.key_prefix, key)
    }

    /// Caches a node's metadata with a TTL. Errors are logged and ignored.
    pub async fn cache_node(&self, meta: &NodeMeta) {
        if let Err(e) = self.try_cache_node(meta).await {
            tracing::debug!(target: "redis", key = %meta.key, error = %e, "cache_node failed, continuing without cache");
        }
    }

    async fn try_cache_node(&self, meta: &NodeMeta) -> Result<(), RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(&CachedNode {
            version: meta.version,
            hash: meta.hash.to_hex(),
            updated_at: meta.updated_at,
        })?;
        redis::cmd("SET")
            .arg(self.node_key(&meta.key))
            .arg(payload)
            .arg("PX")
            .arg(self.config.node_ttl.as_millis() as u64)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Best-effort cache lookup; `None` on a miss or on any error, so
    /// callers always fall back to the authoritative store.
    pub async fn get_cached_node(&self, key: &str) -> Option<NodeMeta> {
        match self.try_get_cached_node(key).await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::debug!(target: "redis", %key, error = %e, "cache lookup failed, falling back to store");
                None
            }
        }
    }

    async fn try_get_cached_node(&self, key: &str) -> Result<Option<NodeMeta>, RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = redis::cmd("GET").arg(self.node_key(key)).query_async(&mut conn).await?;
        let Some(raw) = raw else { return Ok(None) };
        let cached: CachedNode = serde_json::from_str(&raw)?;
        let hash = ContentHash::try_from(cached.hash).map_err(|_| RedisError::CorruptHash)?;
        Ok(Some(NodeMeta { key: key.to_string(), version: cached.version, hash, updated_at: cached.updated_at }))
    }

    pub async fn invalidate_cached(&self, key: &str) {
        if let Ok(mut conn) = self.client.get_multiplexed_async_connection().await {
            let _: Result<(), _> = redis::cmd("DEL").arg(self.node_key(key)).query_async(&mut conn).await;
        }
    }

    /// Publishes an invalidation hint. Best-effort: a publish failure just
    /// means peers relying on Redis miss this hint and fall back to their
    /// normal sync/gossip path.
    pub async fn publish_invalidation(&self, keys: Vec<String>, timestamp: u64) {
        let hint = InvalidationHint { keys, source: self.server_id.clone(), timestamp };
        let Ok(payload) = serde_json::to_string(&hint) else { return };
        if let Ok(mut conn) = self.client.get_multiplexed_async_connection().await {
            let _: Result<i64, _> =
                redis::cmd("PUBLISH").arg(&self.config.invalidation_channel).arg(payload).query_async(&mut conn).await;
        } else {
            tracing::debug!(target: "redis", "publish_invalidation: connection unavailable");
        }
    }

    /// Spawns a background subscriber that invokes `on_hint` for every
    /// invalidation hint not originating from this server. Runs until the
    /// connection is dropped or errors; reconnection is left to the caller
    /// restarting the subscriber, matching the "best effort, never
    /// authoritative" posture of this crate.
    pub fn spawn_subscriber(
        self: &Arc<Self>,
        on_hint: impl Fn(InvalidationHint) + Send + Sync + 'static,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match this.run_subscriber(&on_hint).await {
                    Ok(()) => break,
                    Err(e) => {
                        tracing::warn!(target: "redis", error = %e, "subscriber connection lost, retrying");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        })
    }

    async fn run_subscriber(&self, on_hint: &(impl Fn(InvalidationHint) + Send + Sync)) -> Result<(), RedisError> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(&self.config.invalidation_channel).await?;
        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    tracing::debug!(target: "redis", error = %e, "undecodable pubsub payload, skipping");
                    continue;
                }
            };
            let hint: InvalidationHint = match serde_json::from_str(&payload) {
                Ok(h) => h,
                Err(e) => {
                    tracing::debug!(target: "redis", error = %e, "malformed invalidation hint, skipping");
                    continue;
                }
            };
            if hint.source == self.server_id {
                continue;
            }
            on_hint(hint);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_key_applies_prefix() {
        let accel = RedisAccelerator::connect(RedisConfig::new("redis://127.0.0.1"), "s1").unwrap();
        assert_eq!(accel.node_key("posts"), "reality:node:posts");
    }

    #[test]
    fn invalid_url_is_rejected_eagerly() {
        let err = RedisAccelerator::connect(RedisConfig::new("not-a-url"), "s1");
        assert!(err.is_err());
    }
}
