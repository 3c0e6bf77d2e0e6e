//! Debounce buffer and forwarding engine
//!
//! Inbound messages are grouped by [`BufferKey`] (buffer config id + key field value).
//! A batch is flushed when it reaches `max_size` or when its timer expires, then
//! rendered and sent through every active forwarding rule of the buffer config.

pub mod debounce;
pub mod forwarder;
pub mod render;
pub mod types;

pub use debounce::DebounceBuffer;
pub use forwarder::{FlushOutcome, Forwarder};
pub use render::{render_payload, render_template};
pub use types::{BufferKey, FlushPolicy, PendingMessage, value_to_key};

use crate::ledger::BufferConfigFields;
use std::time::Duration;

impl From<&BufferConfigFields> for FlushPolicy {
    fn from(config: &BufferConfigFields) -> Self {
        Self {
            max_size: config.max_size.max(1) as usize,
            max_time: Duration::from_secs(config.max_time_secs.max(1)),
            reset_on_message: config.reset_timer_on_message,
        }
    }
}
