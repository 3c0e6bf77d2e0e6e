//! Sends flushed batches through every active forwarding rule and records results

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::render::render_payload;
use super::types::{BufferKey, PendingMessage};
use crate::dispatch::{HttpCaller, OutboundRequest, RequestBody};
use crate::ledger::{
    ForwardRecord, ForwardingConfig, LedgerError, MessageStatus, NewForwardedMessage,
    ReceivedRecord, SentRecord,
};
use crate::observability::Metrics;
use crate::storage::{Storage, StorageError};

/// What happened to one flushed batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No active rule; messages marked cancelled
    Cancelled { messages: usize },
    /// Every active rule was attempted; `status` is the worst outcome seen
    Forwarded {
        messages: usize,
        rules: usize,
        failed: usize,
        status: MessageStatus,
    },
}

/// Result of one rule attempt, before it is persisted
struct RuleAttempt {
    status: MessageStatus,
    record: ForwardRecord,
}

pub struct Forwarder {
    storage: Storage,
    caller: Arc<dyn HttpCaller>,
    request_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl Forwarder {
    pub fn new(
        storage: Storage,
        caller: Arc<dyn HttpCaller>,
        request_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            storage,
            caller,
            request_timeout,
            metrics,
        }
    }

    /// Forward one drained batch. Each rule is attempted independently; a failing
    /// rule never stops the ones after it.
    pub async fn forward(
        &self,
        key: &BufferKey,
        batch: &[PendingMessage],
    ) -> Result<FlushOutcome, StorageError> {
        let ids: Vec<u64> = batch.iter().map(|m| m.message_id).collect();
        let buffer_config_id = key.buffer_config_id;

        let rules = match self
            .storage
            .call("list_active_rules", |ledger| ledger.list_active_rules(buffer_config_id))
            .await
        {
            Ok(rules) => rules,
            Err(err) => {
                error!(buffer_config_id, key = %key.key_value, error = %err, "Failed to load forwarding rules");
                self.mark(&ids, MessageStatus::Error, None).await;
                return Err(err);
            }
        };

        if rules.is_empty() {
            self.storage
                .call("mark_messages", |ledger| {
                    ledger.mark_messages(&ids, MessageStatus::Cancelled, None)
                })
                .await?;
            self.metrics.batch_cancelled();
            info!(
                buffer_config_id,
                key = %key.key_value,
                messages = ids.len(),
                "No active forwarding rule, messages cancelled"
            );
            return Ok(FlushOutcome::Cancelled { messages: ids.len() });
        }

        // A missing config falls back to the raw shape; a failed lookup aborts
        let key_field = match self
            .storage
            .call("get_buffer_config", |ledger| ledger.get_buffer_config(buffer_config_id))
            .await
        {
            Ok(config) => config
                .map(|config| config.fields.filter_field)
                .filter(|field| !field.is_empty()),
            Err(err) => {
                error!(buffer_config_id, key = %key.key_value, error = %err, "Failed to load buffer config");
                self.mark(&ids, MessageStatus::Error, None).await;
                return Err(err);
            }
        };

        let representative = ids.first().copied().unwrap_or_default();
        let mut worst = MessageStatus::Success;
        let mut failed = 0;

        for rule in &rules {
            let attempt = self.attempt(rule, batch, key_field.as_deref(), &key.key_value).await;
            if attempt.status == MessageStatus::Error {
                worst = MessageStatus::Error;
                failed += 1;
                self.metrics.forward_failed();
            } else {
                self.metrics.forward_succeeded();
            }

            let recorded = self
                .storage
                .call("record_forward", |ledger| {
                    ledger.record_forward(NewForwardedMessage {
                        received_message_id: representative,
                        forwarding_config_id: rule.id,
                        status: attempt.status,
                        response: attempt.record.clone(),
                    })
                })
                .await;

            match recorded {
                Ok(row) => self.mark(&ids, worst, Some(row.id)).await,
                Err(StorageError::Ledger(LedgerError::RuleNotFound(_))) => {
                    info!(rule_id = rule.id, "Forwarding rule deleted during flush, row dropped");
                    self.mark(&ids, worst, None).await;
                }
                Err(err) => {
                    error!(rule_id = rule.id, error = %err, "Failed to record forward");
                    worst = MessageStatus::Error;
                    self.mark(&ids, worst, None).await;
                }
            }
        }

        self.metrics.batch_flushed();
        info!(
            buffer_config_id,
            key = %key.key_value,
            messages = ids.len(),
            rules = rules.len(),
            failed,
            status = worst.as_str(),
            "Batch forwarded"
        );

        Ok(FlushOutcome::Forwarded {
            messages: ids.len(),
            rules: rules.len(),
            failed,
            status: worst,
        })
    }

    async fn attempt(
        &self,
        rule: &ForwardingConfig,
        batch: &[PendingMessage],
        key_field: Option<&str>,
        key_value: &str,
    ) -> RuleAttempt {
        let payload = render_payload(batch, key_field, key_value, rule.fields.template.as_deref());
        let sent = SentRecord {
            payload: payload.clone(),
            headers: rule.fields.headers.clone(),
        };

        let request = OutboundRequest::builder()
            .method(rule.fields.method)
            .url(rule.fields.url.clone())
            .headers(rule.fields.headers.clone())
            .body(RequestBody::Json(payload))
            .timeout(self.request_timeout)
            .build();

        match self.caller.call(&request).await {
            Ok(response) => {
                let status = if response.is_success() {
                    MessageStatus::Success
                } else {
                    warn!(rule_id = rule.id, url = %rule.fields.url, status = response.status, "Forward rejected downstream");
                    MessageStatus::Error
                };
                RuleAttempt {
                    status,
                    record: ForwardRecord {
                        sent,
                        response: Some(ReceivedRecord {
                            status_code: response.status,
                            text: response.body,
                        }),
                        error: None,
                    },
                }
            }
            Err(err) => {
                warn!(rule_id = rule.id, url = %rule.fields.url, error = %err, "Forward failed");
                RuleAttempt {
                    status: MessageStatus::Error,
                    record: ForwardRecord {
                        sent,
                        response: None,
                        error: Some(err.to_string()),
                    },
                }
            }
        }
    }

    /// Best-effort status update; failures are logged
    async fn mark(&self, ids: &[u64], status: MessageStatus, forwarded_id: Option<u64>) {
        let result = self
            .storage
            .call("mark_messages", |ledger| ledger.mark_messages(ids, status, forwarded_id))
            .await;
        if let Err(err) = result {
            error!(messages = ids.len(), status = status.as_str(), error = %err, "Failed to update message status");
        }
    }
}
