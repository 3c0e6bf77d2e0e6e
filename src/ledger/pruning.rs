/// Pruning and retention policy implementation
use chrono::{DateTime, Duration, Utc};
use fjall::{Keyspace, PartitionHandle};
use serde::de::DeserializeOwned;
use tracing::info;

use super::error::Result;
use super::partitions::encode_meta_key;
use super::records::{Execution, ForwardedMessage, ReceivedMessage};

/// Metadata key holding the RFC 3339 time of the last prune
pub const META_LAST_PRUNE: &str = "last_prune";

/// How long history rows are kept
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub executions_ttl: Duration,
    pub messages_ttl: Duration,
}

impl RetentionPolicy {
    pub fn from_days(executions_days: u32, messages_days: u32) -> Self {
        Self {
            executions_ttl: Duration::days(i64::from(executions_days)),
            messages_ttl: Duration::days(i64::from(messages_days)),
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_days(30, 30)
    }
}

/// Pruning statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneStats {
    pub executions_pruned: usize,
    pub received_pruned: usize,
    pub forwarded_pruned: usize,
}

pub(crate) struct PruneTargets<'a> {
    pub executions: &'a PartitionHandle,
    pub received: &'a PartitionHandle,
    pub forwarded: &'a PartitionHandle,
    pub metadata: &'a PartitionHandle,
}

/// Prune expired rows from the history partitions
pub(crate) fn prune_expired(
    keyspace: &Keyspace,
    targets: &PruneTargets<'_>,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<PruneStats> {
    let execution_cutoff = now - policy.executions_ttl;
    let message_cutoff = now - policy.messages_ttl;

    let mut batch = keyspace.batch();
    let mut stats = PruneStats::default();

    stats.executions_pruned = collect_expired(targets.executions, &mut batch, |row: &Execution| {
        row.executed_at < execution_cutoff
    })?;

    // Unprocessed messages may still sit in a live debounce buffer
    stats.received_pruned = collect_expired(targets.received, &mut batch, |row: &ReceivedMessage| {
        row.processed && row.received_at < message_cutoff
    })?;

    stats.forwarded_pruned = collect_expired(targets.forwarded, &mut batch, |row: &ForwardedMessage| {
        row.forwarded_at < message_cutoff
    })?;

    batch.insert(
        targets.metadata,
        encode_meta_key(META_LAST_PRUNE),
        now.to_rfc3339().into_bytes(),
    );
    batch.commit()?;

    keyspace.persist(fjall::PersistMode::SyncAll)?;
    info!(
        executions = stats.executions_pruned,
        received = stats.received_pruned,
        forwarded = stats.forwarded_pruned,
        "Pruning complete"
    );

    Ok(stats)
}

fn collect_expired<T, F>(partition: &PartitionHandle, batch: &mut fjall::Batch, expired: F) -> Result<usize>
where
    T: DeserializeOwned,
    F: Fn(&T) -> bool,
{
    let mut pruned = 0;
    for item in partition.iter() {
        let (key, value) = item?;
        let row: T = serde_json::from_slice(&value)?;
        if expired(&row) {
            batch.remove(partition, key.to_vec());
            pruned += 1;
        }
    }
    Ok(pruned)
}
