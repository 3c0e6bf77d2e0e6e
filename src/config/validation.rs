use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("storage.pool_size must be at least 1")]
    EmptyPool,

    #[error("storage.retry.max_attempts must be at least 1")]
    NoRetryAttempts,

    #[error("dispatch.request_timeout must be positive")]
    ZeroRequestTimeout,

    #[error("buffer default {field} must be at least 1")]
    InvalidBufferDefault { field: &'static str },

    #[error("retention TTL must be positive: {field} = {value}")]
    InvalidRetentionTtl { field: &'static str, value: u32 },

    #[error("server.max_body_bytes must be positive")]
    ZeroBodyLimit,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_storage(config)?;
    validate_dispatch(config)?;
    validate_buffer_defaults(config)?;
    validate_retention(config)?;

    if config.server.max_body_bytes.as_u64() == 0 {
        return Err(ValidationError::ZeroBodyLimit);
    }

    Ok(())
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.pool_size == 0 {
        return Err(ValidationError::EmptyPool);
    }
    if config.storage.retry.max_attempts == 0 {
        return Err(ValidationError::NoRetryAttempts);
    }
    Ok(())
}

fn validate_dispatch(config: &Config) -> Result<(), ValidationError> {
    if config.dispatch.request_timeout.as_duration().is_zero() {
        return Err(ValidationError::ZeroRequestTimeout);
    }
    Ok(())
}

fn validate_buffer_defaults(config: &Config) -> Result<(), ValidationError> {
    if config.buffer.default_max_size == 0 {
        return Err(ValidationError::InvalidBufferDefault {
            field: "default_max_size",
        });
    }
    if config.buffer.default_max_time_secs == 0 {
        return Err(ValidationError::InvalidBufferDefault {
            field: "default_max_time_secs",
        });
    }
    Ok(())
}

fn validate_retention(config: &Config) -> Result<(), ValidationError> {
    let retention = &config.retention;

    if retention.executions_ttl_days == 0 {
        return Err(ValidationError::InvalidRetentionTtl {
            field: "executions_ttl_days",
            value: retention.executions_ttl_days,
        });
    }
    if retention.messages_ttl_days == 0 {
        return Err(ValidationError::InvalidRetentionTtl {
            field: "messages_ttl_days",
            value: retention.messages_ttl_days,
        });
    }
    Ok(())
}
