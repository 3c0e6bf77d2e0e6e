//! Request and response bodies of the REST surface.
//!
//! Request bodies keep every field optional so that a missing field is reported as a
//! validation error instead of a deserialization failure. Stored entities
//! ([`Schedule`](crate::ledger::Schedule), [`BufferConfig`](crate::ledger::BufferConfig), ...)
//! are returned as-is.
//!
//! A schedule submission (as JSON):
//!
//! ```json
//! {
//!   "name": "nightly-report",
//!   "cron_expression": "0 3 * * *",
//!   "url": "https://reports.example.com/run",
//!   "method": "POST",
//!   "headers": {"Authorization": "Bearer ..."},
//!   "body": {"kind": "nightly"}
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::ledger::{ForwardedMessage, HeaderMap, LedgerStats};
use crate::observability::MetricsSnapshot;
use crate::scheduler::TriggerReport;

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ScheduleRequest {
    pub name: Option<String>,
    #[serde(alias = "cronExpression")]
    pub cron_expression: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub headers: Option<HeaderMap>,
    /// Strings are stored verbatim, any other JSON value as its compact text
    pub body: Option<Value>,
    /// Only honoured on create; defaults to true
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ActiveRequest {
    pub active: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ActiveResponse {
    pub id: u64,
    pub active: bool,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct BufferConfigRequest {
    pub name: Option<String>,
    pub filter_field: Option<String>,
    pub max_size: Option<i64>,
    #[serde(alias = "max_time")]
    pub max_time_secs: Option<i64>,
    pub reset_timer_on_message: Option<bool>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ForwardingConfigRequest {
    pub buffer_config_id: Option<u64>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub headers: Option<HeaderMap>,
    pub fields: Option<Vec<String>>,
    pub template: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecutionQuery {
    pub schedule_id: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WebhookAccepted {
    pub status: String,
    pub message_id: u64,
}

/// Forwarded row joined with its rule name (absent when the rule is gone)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ForwardedView {
    #[serde(flatten)]
    pub message: ForwardedMessage,
    pub forwarding_config_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeletedResponse {
    pub id: u64,
    pub status: String,
}

impl DeletedResponse {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            status: "deleted".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResyncResponse {
    pub registered: usize,
    pub triggers: TriggerReport,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
    pub metrics: MetricsSnapshot,
    pub ledger: Option<LedgerStats>,
}
