use crate::humanize::{ByteSize, HumanDuration};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub buffer: BufferDefaults,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

/// HTTP server and on-disk keyspace
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Fjall keyspace directory
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    /// Upper bound for any JSON request body (webhooks included)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_path: default_data_path(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_data_path() -> PathBuf {
    PathBuf::from("data/hookbox")
}

fn default_max_body_bytes() -> ByteSize {
    ByteSize(1024 * 1024)
}

/// Storage access pool and retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Bounded wait for a pool permit before the call fails as busy
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: HumanDuration,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            acquire_timeout: default_acquire_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_pool_size() -> usize {
    5
}

fn default_acquire_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Linear step: attempt N waits `backoff * N`
    #[serde(default = "default_backoff")]
    pub backoff: HumanDuration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> HumanDuration {
    HumanDuration::from_secs(1)
}

/// Outbound HTTP calls (cron dispatch and buffer forwards share these)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout: HumanDuration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_request_timeout() -> HumanDuration {
    HumanDuration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("hookbox/{}", env!("CARGO_PKG_VERSION"))
}

/// Fallbacks applied when a buffer config is created without explicit thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferDefaults {
    #[serde(default = "default_max_size")]
    pub default_max_size: u32,
    #[serde(default = "default_max_time_secs")]
    pub default_max_time_secs: u64,
}

impl Default for BufferDefaults {
    fn default() -> Self {
        Self {
            default_max_size: default_max_size(),
            default_max_time_secs: default_max_time_secs(),
        }
    }
}

fn default_max_size() -> u32 {
    10
}

fn default_max_time_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_ttl_days")]
    pub executions_ttl_days: u32,
    #[serde(default = "default_ttl_days")]
    pub messages_ttl_days: u32,
    #[serde(default = "default_prune_interval")]
    pub prune_interval: HumanDuration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            executions_ttl_days: default_ttl_days(),
            messages_ttl_days: default_ttl_days(),
            prune_interval: default_prune_interval(),
        }
    }
}

fn default_ttl_days() -> u32 {
    30
}

fn default_prune_interval() -> HumanDuration {
    HumanDuration::from_secs(3600)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub export_on_start: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
            export_on_start: false,
        }
    }
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("data/backups")
}
