//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::GateConfig;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GateConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: GateConfig = toml::from_str(&content)?;

    validate_config(&config)?;

    Ok(config)
}

/// Semantic validation; serde already handled the syntactic side.
pub fn validate_config(config: &GateConfig) -> Result<(), ConfigError> {
    if config.listener.queue_capacity == 0 {
        return Err(ConfigError::Validation(
            "listener.queue_capacity must be at least 1".into(),
        ));
    }
    if config.listener.workers == 0 {
        return Err(ConfigError::Validation(
            "listener.workers must be at least 1".into(),
        ));
    }
    if config.shm.enabled {
        if config.shm.slots == 0 {
            return Err(ConfigError::Validation("shm.slots must be at least 1".into()));
        }
        if config.shm.slot_capacity == 0 {
            return Err(ConfigError::Validation(
                "shm.slot_capacity must be at least 1".into(),
            ));
        }
        if config.shm.namespace.is_empty() || config.shm.namespace.contains('/') {
            return Err(ConfigError::Validation(
                "shm.namespace must be a non-empty name without '/'".into(),
            ));
        }
    }
    if config.proxy.upstream_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "proxy.upstream_timeout_secs must be at least 1".into(),
        ));
    }
    Ok(())
}
