use crate::config::{Config, StorageKind};
use reality_mesh::{HttpPeerTransport, MeshConfig, MeshCoordinator, PeerTransport};
use reality_protocol::{SyncHandler, SyncHandlerConfig};
use reality_redis::{RedisAccelerator, RedisConfig};
use reality_store::memory::MemoryStore;
use reality_store::sql::SqlStore;
use reality_store::StorageAdapter;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("storage initialization failed: {0}")]
    Storage(#[from] reality_store::StoreError),
    #[error("redis initialization failed: {0}")]
    Redis(#[from] reality_redis::RedisError),
    #[error("storage.type {0:?} is not implemented")]
    UnsupportedStorage(StorageKind),
}

/// Process-lifetime bundle of the node store, mesh coordinator, optional
/// Redis accelerator, and sync handler (§9's "explicit process-lifetime
/// registry object" note, grounded on how `nearcore::NearNode` assembles its
/// siblings in `nearcore/src/lib.rs`). Constructed once in `main`, passed
/// around as `Arc<Registry>`.
pub struct Registry {
    pub config: Config,
    pub handler: Arc<SyncHandler>,
    pub mesh: MeshCoordinator,
    pub redis: Option<Arc<RedisAccelerator>>,
    pub transport: Arc<dyn PeerTransport>,
}

impl Registry {
    pub async fn build(config: Config) -> Result<Self, RegistryError> {
        let store: Arc<dyn StorageAdapter> = match config.storage.kind {
            StorageKind::Memory => Arc::new(MemoryStore::new()),
            StorageKind::Sql => {
                let connection_string = config
                    .storage
                    .connection_string
                    .as_deref()
                    .expect("validate_config guarantees this is set for sql storage");
                Arc::new(SqlStore::connect(connection_string, config.storage.table_name.clone()).await?)
            }
            other => return Err(RegistryError::UnsupportedStorage(other)),
        };

        let redis = if config.redis.enabled {
            let url = config.redis.url.clone().expect("validate_config guarantees this is set when enabled");
            let mut redis_config = RedisConfig::new(url);
            redis_config.key_prefix = config.redis.prefix.clone();
            redis_config.invalidation_channel = format!("{}invalidations", config.redis.prefix);
            Some(Arc::new(RedisAccelerator::connect(redis_config, config.server_id.clone())?))
        } else {
            None
        };

        let mesh = MeshCoordinator::new(config.server_id.clone(), config.peers.clone(), MeshConfig::default());
        let transport: Arc<dyn PeerTransport> = Arc::new(HttpPeerTransport::new(config.peer_timeout()));

        if let Some(redis) = &redis {
            redis.spawn_subscriber(|hint| {
                tracing::debug!(target: "redis", source = %hint.source, keys = ?hint.keys, "invalidation hint received");
            });
        }

        let handler = Arc::new(SyncHandler::new(
            config.server_id.clone(),
            store,
            mesh.clone(),
            transport.clone(),
            redis.clone(),
            None,
            SyncHandlerConfig { invalidation_mode: config.invalidation.mode, ..SyncHandlerConfig::default() },
        ));

        Ok(Registry { config, handler, mesh, redis, transport })
    }

    /// Runs the periodic staleness-decay tick for the mesh (§4.2). Intended
    /// to be spawned once by the owning binary; stops when the returned
    /// handle is aborted.
    pub fn spawn_decay_loop(&self, period: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let mesh = self.mesh.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                mesh.decay_stale_peers();
            }
        })
    }

    /// Runs the periodic unhealthy-peer retry tick (§4.2: "retried on a
    /// capped exponential-backoff schedule"). Each tick only pings peers
    /// whose own backoff window has elapsed, so a short period here is safe
    /// — the actual retry cadence per peer is governed by `MeshCoordinator`.
    pub fn spawn_retry_loop(&self, period: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let mesh = self.mesh.clone();
        let transport = self.transport.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                mesh.retry_unhealthy_peers(transport.clone());
            }
        })
    }
}
