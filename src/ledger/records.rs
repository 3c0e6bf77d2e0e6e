/// Persisted entities stored as JSON values in the ledger partitions
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound header set, kept ordered so stored rows and sent requests are stable
pub type HeaderMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(other.to_string()),
        }
    }
}

/// Editable part of a schedule; `active` and `created_at` are managed separately
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleFields {
    pub name: String,
    pub cron_expression: String,
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: u64,
    #[serde(flatten)]
    pub fields: ScheduleFields,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
        }
    }
}

/// One dispatch attempt of a schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: u64,
    pub schedule_id: u64,
    pub schedule_name: String,
    pub status: ExecutionStatus,
    pub response: String,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewExecution {
    pub schedule_id: u64,
    pub schedule_name: String,
    pub status: ExecutionStatus,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfigFields {
    pub name: String,
    /// Field of the inbound JSON whose value selects the buffer key
    pub filter_field: String,
    pub max_size: u32,
    pub max_time_secs: u64,
    pub reset_timer_on_message: bool,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    pub id: u64,
    #[serde(flatten)]
    pub fields: BufferConfigFields,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardingConfigFields {
    pub buffer_config_id: u64,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HeaderMap,
    /// Legacy field list, stored but not used for rendering
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub template: Option<String>,
    pub active: bool,
}

/// A forwarding rule: downstream destination scoped to one buffer config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardingConfig {
    pub id: u64,
    #[serde(flatten)]
    pub fields: ForwardingConfigFields,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Success,
    Error,
    Cancelled,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Success => "success",
            MessageStatus::Error => "error",
            MessageStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub id: u64,
    pub payload: Value,
    pub source: String,
    pub buffer_config_id: u64,
    pub received_at: DateTime<Utc>,
    pub processed: bool,
    pub forwarded_id: Option<u64>,
    pub status: Option<MessageStatus>,
}

#[derive(Debug, Clone)]
pub struct NewReceivedMessage {
    pub payload: Value,
    pub source: String,
    pub buffer_config_id: u64,
}

/// What was sent downstream for one flushed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentRecord {
    pub payload: Value,
    pub headers: HeaderMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedRecord {
    pub status_code: u16,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardRecord {
    pub sent: SentRecord,
    #[serde(default)]
    pub response: Option<ReceivedRecord>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One row per flushed batch per forwarding rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardedMessage {
    pub id: u64,
    /// First message of the batch, representing the whole batch
    pub received_message_id: u64,
    pub forwarding_config_id: u64,
    pub status: MessageStatus,
    pub response: ForwardRecord,
    pub forwarded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewForwardedMessage {
    pub received_message_id: u64,
    pub forwarding_config_id: u64,
    pub status: MessageStatus,
    pub response: ForwardRecord,
}

/// Portable copy of the configuration tables plus execution history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schedules: Vec<Schedule>,
    pub executions: Vec<Execution>,
    pub buffer_configs: Vec<BufferConfig>,
    pub forwarding_configs: Vec<ForwardingConfig>,
}
