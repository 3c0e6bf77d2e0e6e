use serde_json::Value;

/// Identifies one independent accumulation stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferKey {
    pub buffer_config_id: u64,
    pub key_value: String,
}

impl BufferKey {
    pub fn new(buffer_config_id: u64, key_value: impl Into<String>) -> Self {
        Self {
            buffer_config_id,
            key_value: key_value.into(),
        }
    }
}

/// A persisted message waiting in a buffer
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub message_id: u64,
    pub data: Value,
}

/// Flush thresholds taken from the buffer config at ingest time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub max_size: usize,
    pub max_time: std::time::Duration,
    pub reset_on_message: bool,
}

/// String form of a JSON value used for keys and template substitution:
/// strings verbatim, everything else as compact JSON
pub fn value_to_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
