//! Metrics counters and tracing setup

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber; `RUST_LOG` overrides the `info` default
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Process-wide counters reported by the health endpoint
#[derive(Debug, Default)]
pub struct Metrics {
    messages_ingested: AtomicU64,
    batches_flushed: AtomicU64,
    batches_cancelled: AtomicU64,
    forwards_succeeded: AtomicU64,
    forwards_failed: AtomicU64,
    executions_succeeded: AtomicU64,
    executions_failed: AtomicU64,
    executions_skipped: AtomicU64,
}

macro_rules! counter {
    ($method:ident, $field:ident) => {
        pub fn $method(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(counter = stringify!($field), "Metric incremented");
        }
    };
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(message_ingested, messages_ingested);
    counter!(batch_flushed, batches_flushed);
    counter!(batch_cancelled, batches_cancelled);
    counter!(forward_succeeded, forwards_succeeded);
    counter!(forward_failed, forwards_failed);
    counter!(execution_succeeded, executions_succeeded);
    counter!(execution_failed, executions_failed);
    counter!(execution_skipped, executions_skipped);

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_ingested: self.messages_ingested.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            batches_cancelled: self.batches_cancelled.load(Ordering::Relaxed),
            forwards_succeeded: self.forwards_succeeded.load(Ordering::Relaxed),
            forwards_failed: self.forwards_failed.load(Ordering::Relaxed),
            executions_succeeded: self.executions_succeeded.load(Ordering::Relaxed),
            executions_failed: self.executions_failed.load(Ordering::Relaxed),
            executions_skipped: self.executions_skipped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub messages_ingested: u64,
    pub batches_flushed: u64,
    pub batches_cancelled: u64,
    pub forwards_succeeded: u64,
    pub forwards_failed: u64,
    pub executions_succeeded: u64,
    pub executions_failed: u64,
    pub executions_skipped: u64,
}
