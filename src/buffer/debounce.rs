//! Per-key message accumulation with size and time flush triggers

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::forwarder::{FlushOutcome, Forwarder};
use super::types::{BufferKey, FlushPolicy, PendingMessage};
use crate::storage::StorageError;

struct TimerHandle {
    generation: u64,
    task: AbortHandle,
}

#[derive(Default)]
struct BufferState {
    pending: HashMap<BufferKey, Vec<PendingMessage>>,
    timers: HashMap<BufferKey, TimerHandle>,
    next_generation: u64,
}

struct Inner {
    state: Mutex<BufferState>,
    forwarder: Forwarder,
}

/// Owns every in-memory batch and its flush timer.
///
/// Batches and timers live behind one lock. Draining a batch and removing its timer
/// happen in the same critical section, so of two racing flushes for one key
/// exactly one sees the messages and the other sees an empty batch.
#[derive(Clone)]
pub struct DebounceBuffer {
    inner: Arc<Inner>,
}

impl DebounceBuffer {
    pub fn new(forwarder: Forwarder) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(BufferState::default()),
                forwarder,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BufferState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a message to its key's batch.
    ///
    /// A new timer is started when `reset_on_message` is set or the key has none;
    /// otherwise the running timer is left alone. Reaching `max_size` flushes before
    /// returning, and the outcome of that flush is returned.
    pub async fn ingest(
        &self,
        key: BufferKey,
        message: PendingMessage,
        policy: FlushPolicy,
    ) -> Result<Option<FlushOutcome>, StorageError> {
        let full = {
            let mut state = self.state();
            let pending = state.pending.entry(key.clone()).or_default();
            pending.push(message);
            let len = pending.len();

            debug!(
                buffer_config_id = key.buffer_config_id,
                key = %key.key_value,
                pending = len,
                "Message buffered"
            );

            if policy.reset_on_message || !state.timers.contains_key(&key) {
                if let Some(previous) = state.timers.remove(&key) {
                    previous.task.abort();
                }
                state.next_generation += 1;
                let generation = state.next_generation;
                let task = self.spawn_timer(key.clone(), generation, policy.max_time);
                state.timers.insert(key.clone(), TimerHandle { generation, task });
            }

            len >= policy.max_size
        };

        if full {
            info!(
                buffer_config_id = key.buffer_config_id,
                key = %key.key_value,
                "Buffer full, flushing"
            );
            return self.flush(&key).await;
        }
        Ok(None)
    }

    /// Drain and forward the batch for `key`, cancelling its timer.
    /// Returns `Ok(None)` when there was nothing to flush.
    ///
    /// Once drained, the batch is forwarded to completion even if the returned
    /// future is dropped.
    pub async fn flush(&self, key: &BufferKey) -> Result<Option<FlushOutcome>, StorageError> {
        let batch = {
            let mut state = self.state();
            if let Some(timer) = state.timers.remove(key) {
                timer.task.abort();
            }
            state.pending.remove(key).unwrap_or_default()
        };

        self.forward(key, batch).await
    }

    /// Timer expiry: flush only if this timer is still the one owning the key
    async fn flush_expired(&self, key: &BufferKey, generation: u64) {
        let batch = {
            let mut state = self.state();
            match state.timers.get(key) {
                Some(timer) if timer.generation == generation => {
                    state.timers.remove(key);
                    state.pending.remove(key).unwrap_or_default()
                }
                _ => {
                    debug!(key = %key.key_value, generation, "Stale timer fired, ignoring");
                    return;
                }
            }
        };

        info!(
            buffer_config_id = key.buffer_config_id,
            key = %key.key_value,
            "Buffer timer expired, flushing"
        );
        if let Err(err) = self.forward(key, batch).await {
            error!(
                buffer_config_id = key.buffer_config_id,
                key = %key.key_value,
                error = %err,
                "Timed flush failed"
            );
        }
    }

    async fn forward(
        &self,
        key: &BufferKey,
        batch: Vec<PendingMessage>,
    ) -> Result<Option<FlushOutcome>, StorageError> {
        if batch.is_empty() {
            debug!(
                buffer_config_id = key.buffer_config_id,
                key = %key.key_value,
                "Nothing to flush"
            );
            return Ok(None);
        }

        // The batch is already drained; run it detached so a dropped caller
        // cannot abandon it halfway
        let inner = Arc::clone(&self.inner);
        let owned_key = key.clone();
        let task = tokio::spawn(async move { inner.forwarder.forward(&owned_key, &batch).await });

        match task.await {
            Ok(result) => result.map(Some),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => {
                warn!(
                    buffer_config_id = key.buffer_config_id,
                    key = %key.key_value,
                    error = %err,
                    "Flush task cancelled"
                );
                Ok(None)
            }
        }
    }

    fn spawn_timer(&self, key: BufferKey, generation: u64, after: std::time::Duration) -> AbortHandle {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(inner) = weak.upgrade() {
                DebounceBuffer { inner }.flush_expired(&key, generation).await;
            }
        });
        handle.abort_handle()
    }

    /// Number of messages waiting under `key`
    pub fn pending_len(&self, key: &BufferKey) -> usize {
        self.state().pending.get(key).map_or(0, Vec::len)
    }

    pub fn has_timer(&self, key: &BufferKey) -> bool {
        self.state().timers.contains_key(key)
    }

    /// Keys that currently hold messages
    pub fn pending_keys(&self) -> Vec<BufferKey> {
        self.state().pending.keys().cloned().collect()
    }
}
