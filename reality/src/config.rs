use reality_protocol::InvalidationMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 4477;
pub const DEFAULT_BASE_PATH: &str = "/reality";
pub const DEFAULT_TABLE_NAME: &str = "reality_nodes";
pub const DEFAULT_REDIS_PREFIX: &str = "reality:";
pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 120;
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 60_000;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_execution_mode() -> String {
    "standalone".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    Sql,
    /// Accepted on the wire for compatibility with the broader
    /// configuration surface this mesh can be deployed alongside, but not
    /// implemented by this workspace; rejected at `validate_config` time.
    Drizzle,
    Prisma,
    Dynamodb,
    Redis,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    #[serde(rename = "connectionString")]
    pub connection_string: Option<String>,
    #[serde(default = "default_table_name", rename = "tableName")]
    pub table_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig { kind: StorageKind::Memory, connection_string: None, table_name: default_table_name() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfigSection {
    #[serde(default)]
    pub enabled: bool,
    pub url: Option<String>,
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

fn default_redis_prefix() -> String {
    DEFAULT_REDIS_PREFIX.to_string()
}

impl Default for RedisConfigSection {
    fn default() -> Self {
        RedisConfigSection { enabled: false, url: None, prefix: default_redis_prefix() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    pub origins: Vec<String>,
    #[serde(default)]
    pub credentials: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_requests", rename = "maxRequests")]
    pub max_requests: u32,
    #[serde(default = "default_window_ms", rename = "windowMs")]
    pub window_ms: u64,
}

fn default_max_requests() -> u32 {
    DEFAULT_RATE_LIMIT_MAX_REQUESTS
}

fn default_window_ms() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_MS
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig { enabled: false, max_requests: default_max_requests(), window_ms: default_window_ms() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationConfig {
    #[serde(default = "default_invalidation_mode")]
    pub mode: InvalidationMode,
}

fn default_invalidation_mode() -> InvalidationMode {
    InvalidationMode::Advisory
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        InvalidationConfig { mode: default_invalidation_mode() }
    }
}

/// Top-level process configuration, validated at boot by [`crate::config_validate::validate_config`] (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "serverId")]
    pub server_id: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default, rename = "rateLimit")]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub redis: RedisConfigSection,
    #[serde(rename = "payloadBaseUrl")]
    pub payload_base_url: Option<String>,
    /// Opaque deployment-mode label (e.g. `standalone`, `embedded`);
    /// informational only, like `SyncRequest.mode` — it never changes core
    /// sync/mesh semantics.
    #[serde(default = "default_execution_mode", rename = "executionMode")]
    pub execution_mode: String,
    #[serde(default)]
    pub invalidation: InvalidationConfig,
}

impl Config {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(3)
    }
}
