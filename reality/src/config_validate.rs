use crate::config::{Config, StorageKind};

/// Accumulates validation failures instead of failing fast, mirroring the
/// batch-reporting shape of a boot-time config check: a misconfigured
/// deployment should see every problem in one pass, not one per restart.
#[derive(Debug, Default)]
pub struct ConfigValidationErrors {
    messages: Vec<String>,
}

impl ConfigValidationErrors {
    fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

impl std::fmt::Display for ConfigValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "config validation failed with {} error(s):", self.messages.len())?;
        for msg in &self.messages {
            writeln!(f, "  - {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigValidationErrors {}

struct ConfigValidator<'a> {
    config: &'a Config,
    errors: ConfigValidationErrors,
}

impl<'a> ConfigValidator<'a> {
    fn new(config: &'a Config) -> Self {
        ConfigValidator { config, errors: ConfigValidationErrors::default() }
    }

    fn validate_all_conditions(&mut self) {
        if self.config.server_id.trim().is_empty() {
            self.errors.push("serverId must not be empty");
        }
        if self.config.port == 0 {
            self.errors.push("port must be nonzero");
        }
        for peer in &self.config.peers {
            if !(peer.starts_with("http://") || peer.starts_with("https://")) {
                self.errors.push(format!("peer url '{peer}' must start with http:// or https://"));
            }
        }

        match self.config.storage.kind {
            StorageKind::Memory => {
                if self.config.storage.connection_string.is_some() {
                    self.errors.push("storage.connectionString is not used when storage.type is memory");
                }
            }
            StorageKind::Sql => {
                if self.config.storage.connection_string.is_none() {
                    self.errors.push("storage.connectionString is required when storage.type is sql");
                }
            }
            other => {
                self.errors.push(format!("storage.type {other:?} is not implemented by this deployment"));
            }
        }

        if self.config.redis.enabled && self.config.redis.url.is_none() {
            self.errors.push("redis.url is required when redis.enabled is true");
        }

        if self.config.rate_limit.enabled && self.config.rate_limit.max_requests == 0 {
            self.errors.push("rateLimit.maxRequests must be nonzero when rateLimit.enabled is true");
        }

        if self.config.cors.credentials && self.config.cors.origins.iter().any(|o| o == "*") {
            self.errors.push("cors.credentials cannot be combined with a wildcard cors.origins entry");
        }
    }
}

/// Validates a loaded [`Config`], returning every violation found rather
/// than stopping at the first.
pub fn validate_config(config: &Config) -> Result<(), ConfigValidationErrors> {
    tracing::info!(target: "config", "validating configuration for server {}", config.server_id);
    let mut validator = ConfigValidator::new(config);
    validator.validate_all_conditions();
    if validator.errors.is_empty() {
        Ok(())
    } else {
        Err(validator.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, CorsConfig, InvalidationConfig, RateLimitConfig, RedisConfigSection, StorageConfig};

    fn base_config() -> Config {
        Config {
            server_id: "server-1".to_string(),
            host: "0.0.0.0".to_string(),
            port: 4477,
            base_path: "/reality".to_string(),
            peers: vec![],
            cors: CorsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            debug: false,
            storage: StorageConfig::default(),
            redis: RedisConfigSection::default(),
            payload_base_url: None,
            execution_mode: "standalone".to_string(),
            invalidation: InvalidationConfig::default(),
        }
    }

    #[test]
    fn accepts_a_minimal_valid_config() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn rejects_empty_server_id() {
        let mut config = base_config();
        config.server_id = "".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn accumulates_multiple_errors() {
        let mut config = base_config();
        config.server_id = "".to_string();
        config.port = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.messages().len() >= 2);
    }

    #[test]
    fn sql_storage_requires_connection_string() {
        let mut config = base_config();
        config.storage = StorageConfig { kind: crate::config::StorageKind::Sql, connection_string: None, table_name: "t".into() };
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.messages().iter().any(|m| m.contains("connectionString")));
    }

    #[test]
    fn unimplemented_storage_kind_is_rejected() {
        let mut config = base_config();
        config.storage =
            StorageConfig { kind: crate::config::StorageKind::Dynamodb, connection_string: Some("x".into()), table_name: "t".into() };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_peer_url_without_scheme() {
        let mut config = base_config();
        config.peers = vec!["peer-b.internal:4477".to_string()];
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.messages().iter().any(|m| m.contains("http")));
    }
}
