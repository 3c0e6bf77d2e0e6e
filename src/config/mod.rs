//! Configuration management for hookbox
//!
//! Settings are layered from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables, including those loaded from `.env` (highest priority)
//!
//! # Environment Variables
//!
//! Any key can be overridden with `HOOKBOX__<section>__<key>`, e.g.
//! - `HOOKBOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `HOOKBOX__DISPATCH__REQUEST_TIMEOUT=15s`
//! - `HOOKBOX__STORAGE__POOL_SIZE=8`
//!
//! # Configuration File
//!
//! Loaded from `config/hookbox.toml` unless `HOOKBOX_CONFIG` points elsewhere.

mod models;
mod sources;
mod validation;

pub use crate::humanize::{ByteSize, HumanDuration};
pub use models::{
    BackupConfig, BufferDefaults, Config, DispatchConfig, RetentionConfig, RetryConfig,
    ServerConfig, StorageConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from file + environment and validate it
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_full_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("hookbox.toml");

        fs::write(
            &config_path,
            r#"
[server]
bind_addr = "0.0.0.0:8080"
data_path = "data/hookbox"
max_body_bytes = "2MB"

[storage]
pool_size = 5
acquire_timeout = "10s"

[storage.retry]
max_attempts = 4
backoff = "250ms"

[dispatch]
request_timeout = "30s"
user_agent = "hookbox-test"

[buffer]
default_max_size = 20
default_max_time_secs = 120

[retention]
executions_ttl_days = 14
messages_ttl_days = 7

[backup]
dir = "data/backups"
export_on_start = true
            "#,
        )
        .unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.storage.retry.max_attempts, 4);
        assert_eq!(config.dispatch.user_agent, "hookbox-test");
        assert_eq!(config.buffer.default_max_size, 20);
        assert_eq!(config.retention.messages_ttl_days, 7);
        assert!(config.backup.export_on_start);
    }

    #[test]
    fn test_validation_runs_after_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("hookbox.toml");

        fs::write(
            &config_path,
            r#"
[storage]
pool_size = 0
            "#,
        )
        .unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::EmptyPool)
        ));
    }
}
