use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use fjall::{Batch, Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::error::{LedgerError, Result};
use super::partitions::{
    Sequence, decode_id_key, encode_buffer_key, encode_execution_key, encode_execution_prefix,
    encode_forwarded_key, encode_received_key, encode_rule_key, encode_schedule_key,
    encode_sequence_key,
};
use super::pruning::{PruneStats, PruneTargets, RetentionPolicy, prune_expired};
use super::records::{
    BufferConfig, BufferConfigFields, Execution, ForwardedMessage, ForwardingConfig,
    ForwardingConfigFields, MessageStatus, NewExecution, NewForwardedMessage, NewReceivedMessage,
    ReceivedMessage, Schedule, ScheduleFields, Snapshot,
};

/// Fjall-backed persistent storage for schedules, buffers, rules and message history
///
/// Every write that allocates an id or touches more than one row runs under the
/// writer lock and commits through a single batch.
#[derive(Clone)]
pub struct Ledger {
    keyspace: Keyspace,
    schedules: PartitionHandle,
    executions: PartitionHandle,
    buffers: PartitionHandle,
    rules: PartitionHandle,
    received: PartitionHandle,
    forwarded: PartitionHandle,
    metadata: PartitionHandle,
    write_lock: Arc<Mutex<()>>,
}

impl Ledger {
    /// Open or create a ledger at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening ledger at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let open = |name: &str| keyspace.open_partition(name, PartitionCreateOptions::default());
        let schedules = open("schedules")?;
        let executions = open("executions")?;
        let buffers = open("buffers")?;
        let rules = open("rules")?;
        let received = open("received")?;
        let forwarded = open("forwarded")?;
        let metadata = open("metadata")?;

        info!("Ledger opened successfully");
        Ok(Self {
            keyspace,
            schedules,
            executions,
            buffers,
            rules,
            received,
            forwarded,
            metadata,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn writer(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    fn read_counter(&self, sequence: Sequence) -> Result<u64> {
        match self.metadata.get(encode_sequence_key(sequence))? {
            Some(raw) => {
                let text = String::from_utf8_lossy(&raw).to_string();
                text.parse::<u64>()
                    .map_err(|_| LedgerError::CorruptSequence(text))
            }
            None => Ok(0),
        }
    }

    /// Reserve the next id of a sequence; the counter update lands with the batch
    fn allocate_id(&self, batch: &mut Batch, sequence: Sequence) -> Result<u64> {
        let next = self.read_counter(sequence)? + 1;
        batch.insert(
            &self.metadata,
            encode_sequence_key(sequence),
            next.to_string().into_bytes(),
        );
        Ok(next)
    }

    fn get_json<T: DeserializeOwned>(partition: &PartitionHandle, key: Vec<u8>) -> Result<Option<T>> {
        match partition.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(
        batch: &mut Batch,
        partition: &PartitionHandle,
        key: Vec<u8>,
        value: &T,
    ) -> Result<()> {
        batch.insert(partition, key, serde_json::to_vec(value)?);
        Ok(())
    }

    /// All rows of a partition in key order
    fn scan<T: DeserializeOwned>(partition: &PartitionHandle) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        for item in partition.iter() {
            let (_, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    /// Newest rows first, at most `limit`
    fn scan_recent<T: DeserializeOwned>(partition: &PartitionHandle, limit: usize) -> Result<Vec<T>> {
        let mut rows = Vec::with_capacity(limit.min(128));
        for item in partition.iter().rev().take(limit) {
            let (_, value) = item?;
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    // ---- schedules ----

    pub fn insert_schedule(&self, fields: ScheduleFields, active: bool) -> Result<Schedule> {
        let _guard = self.writer()?;
        let mut batch = self.keyspace.batch();

        let id = self.allocate_id(&mut batch, Sequence::Schedule)?;
        let schedule = Schedule {
            id,
            fields,
            active,
            created_at: Utc::now(),
        };
        Self::put_json(&mut batch, &self.schedules, encode_schedule_key(id), &schedule)?;
        batch.commit()?;

        debug!(schedule_id = id, "Inserted schedule");
        Ok(schedule)
    }

    pub fn get_schedule(&self, id: u64) -> Result<Option<Schedule>> {
        Self::get_json(&self.schedules, encode_schedule_key(id))
    }

    /// All schedules, newest id first
    pub fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let mut schedules: Vec<Schedule> = Self::scan(&self.schedules)?;
        schedules.reverse();
        Ok(schedules)
    }

    pub fn list_active_schedules(&self) -> Result<Vec<Schedule>> {
        let schedules: Vec<Schedule> = Self::scan(&self.schedules)?;
        Ok(schedules.into_iter().filter(|s| s.active).collect())
    }

    /// Replace the editable fields, keeping `active` and `created_at`
    pub fn update_schedule(&self, id: u64, fields: ScheduleFields) -> Result<Option<Schedule>> {
        let _guard = self.writer()?;
        let Some(mut schedule) = self.get_schedule(id)? else {
            return Ok(None);
        };

        schedule.fields = fields;
        let mut batch = self.keyspace.batch();
        Self::put_json(&mut batch, &self.schedules, encode_schedule_key(id), &schedule)?;
        batch.commit()?;

        debug!(schedule_id = id, "Updated schedule");
        Ok(Some(schedule))
    }

    pub fn set_schedule_active(&self, id: u64, active: bool) -> Result<Option<Schedule>> {
        let _guard = self.writer()?;
        let Some(mut schedule) = self.get_schedule(id)? else {
            return Ok(None);
        };

        schedule.active = active;
        let mut batch = self.keyspace.batch();
        Self::put_json(&mut batch, &self.schedules, encode_schedule_key(id), &schedule)?;
        batch.commit()?;

        debug!(schedule_id = id, active, "Set schedule active flag");
        Ok(Some(schedule))
    }

    /// Delete a schedule together with all of its executions
    pub fn delete_schedule(&self, id: u64) -> Result<bool> {
        let _guard = self.writer()?;
        if self.get_schedule(id)?.is_none() {
            return Ok(false);
        }

        let mut batch = self.keyspace.batch();
        let mut removed_executions = 0usize;
        for item in self.executions.prefix(encode_execution_prefix(id)) {
            let (key, _) = item?;
            batch.remove(&self.executions, key.to_vec());
            removed_executions += 1;
        }
        batch.remove(&self.schedules, encode_schedule_key(id));
        batch.commit()?;

        debug!(schedule_id = id, removed_executions, "Deleted schedule");
        Ok(true)
    }

    // ---- executions ----

    /// Append an execution row. Fails with [`LedgerError::ScheduleNotFound`] once the
    /// schedule is deleted, so a late dispatch cannot outlive the delete cascade.
    pub fn append_execution(&self, new: NewExecution) -> Result<Execution> {
        let _guard = self.writer()?;
        if !self.schedules.contains_key(encode_schedule_key(new.schedule_id))? {
            return Err(LedgerError::ScheduleNotFound(new.schedule_id));
        }
        let mut batch = self.keyspace.batch();

        let id = self.allocate_id(&mut batch, Sequence::Execution)?;
        let execution = Execution {
            id,
            schedule_id: new.schedule_id,
            schedule_name: new.schedule_name,
            status: new.status,
            response: new.response,
            executed_at: Utc::now(),
        };
        Self::put_json(
            &mut batch,
            &self.executions,
            encode_execution_key(execution.schedule_id, id),
            &execution,
        )?;
        batch.commit()?;

        debug!(schedule_id = execution.schedule_id, execution_id = id, "Appended execution");
        Ok(execution)
    }

    /// Executions newest first, optionally restricted to one schedule
    pub fn list_executions(&self, schedule_id: Option<u64>) -> Result<Vec<Execution>> {
        let mut executions: Vec<Execution> = match schedule_id {
            Some(schedule_id) => {
                let mut rows = Vec::new();
                for item in self.executions.prefix(encode_execution_prefix(schedule_id)) {
                    let (_, value) = item?;
                    rows.push(serde_json::from_slice(&value)?);
                }
                rows
            }
            None => Self::scan(&self.executions)?,
        };
        executions.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(executions)
    }

    // ---- buffer configs ----

    pub fn insert_buffer_config(&self, fields: BufferConfigFields) -> Result<BufferConfig> {
        let _guard = self.writer()?;
        let mut batch = self.keyspace.batch();

        let id = self.allocate_id(&mut batch, Sequence::Buffer)?;
        let config = BufferConfig {
            id,
            fields,
            created_at: Utc::now(),
        };
        Self::put_json(&mut batch, &self.buffers, encode_buffer_key(id), &config)?;
        batch.commit()?;

        debug!(buffer_config_id = id, "Inserted buffer config");
        Ok(config)
    }

    pub fn get_buffer_config(&self, id: u64) -> Result<Option<BufferConfig>> {
        Self::get_json(&self.buffers, encode_buffer_key(id))
    }

    /// Overwrite a buffer config row with bytes that do not decode
    #[cfg(test)]
    pub(crate) fn corrupt_buffer_config(&self, id: u64) -> Result<()> {
        self.buffers.insert(encode_buffer_key(id), b"not json".to_vec())?;
        Ok(())
    }

    pub fn list_buffer_configs(&self) -> Result<Vec<BufferConfig>> {
        let mut configs: Vec<BufferConfig> = Self::scan(&self.buffers)?;
        configs.reverse();
        Ok(configs)
    }

    pub fn update_buffer_config(
        &self,
        id: u64,
        fields: BufferConfigFields,
    ) -> Result<Option<BufferConfig>> {
        let _guard = self.writer()?;
        let Some(mut config) = self.get_buffer_config(id)? else {
            return Ok(None);
        };

        config.fields = fields;
        let mut batch = self.keyspace.batch();
        Self::put_json(&mut batch, &self.buffers, encode_buffer_key(id), &config)?;
        batch.commit()?;
        Ok(Some(config))
    }

    /// Delete a buffer config, its forwarding rules and their forwarded rows
    pub fn delete_buffer_config(&self, id: u64) -> Result<bool> {
        let _guard = self.writer()?;
        if self.get_buffer_config(id)?.is_none() {
            return Ok(false);
        }

        let rule_ids: Vec<u64> = Self::scan::<ForwardingConfig>(&self.rules)?
            .into_iter()
            .filter(|rule| rule.fields.buffer_config_id == id)
            .map(|rule| rule.id)
            .collect();

        let mut batch = self.keyspace.batch();
        for rule_id in &rule_ids {
            batch.remove(&self.rules, encode_rule_key(*rule_id));
        }
        let removed_forwards = self.remove_forwards_for(&mut batch, &rule_ids)?;
        batch.remove(&self.buffers, encode_buffer_key(id));
        batch.commit()?;

        debug!(
            buffer_config_id = id,
            removed_rules = rule_ids.len(),
            removed_forwards,
            "Deleted buffer config"
        );
        Ok(true)
    }

    // ---- forwarding configs ----

    pub fn insert_forwarding_config(
        &self,
        fields: ForwardingConfigFields,
    ) -> Result<ForwardingConfig> {
        let _guard = self.writer()?;
        if self.get_buffer_config(fields.buffer_config_id)?.is_none() {
            return Err(LedgerError::BufferNotFound(fields.buffer_config_id));
        }

        let mut batch = self.keyspace.batch();
        let id = self.allocate_id(&mut batch, Sequence::Rule)?;
        let config = ForwardingConfig {
            id,
            fields,
            created_at: Utc::now(),
        };
        Self::put_json(&mut batch, &self.rules, encode_rule_key(id), &config)?;
        batch.commit()?;

        debug!(forwarding_config_id = id, "Inserted forwarding config");
        Ok(config)
    }

    pub fn get_forwarding_config(&self, id: u64) -> Result<Option<ForwardingConfig>> {
        Self::get_json(&self.rules, encode_rule_key(id))
    }

    pub fn list_forwarding_configs(&self) -> Result<Vec<ForwardingConfig>> {
        let mut configs: Vec<ForwardingConfig> = Self::scan(&self.rules)?;
        configs.reverse();
        Ok(configs)
    }

    /// Active rules of one buffer config, oldest first
    pub fn list_active_rules(&self, buffer_config_id: u64) -> Result<Vec<ForwardingConfig>> {
        let rules: Vec<ForwardingConfig> = Self::scan(&self.rules)?;
        Ok(rules
            .into_iter()
            .filter(|rule| rule.fields.active && rule.fields.buffer_config_id == buffer_config_id)
            .collect())
    }

    pub fn update_forwarding_config(
        &self,
        id: u64,
        fields: ForwardingConfigFields,
    ) -> Result<Option<ForwardingConfig>> {
        let _guard = self.writer()?;
        let Some(mut config) = self.get_forwarding_config(id)? else {
            return Ok(None);
        };
        if self.get_buffer_config(fields.buffer_config_id)?.is_none() {
            return Err(LedgerError::BufferNotFound(fields.buffer_config_id));
        }

        config.fields = fields;
        let mut batch = self.keyspace.batch();
        Self::put_json(&mut batch, &self.rules, encode_rule_key(id), &config)?;
        batch.commit()?;
        Ok(Some(config))
    }

    /// Delete a forwarding rule and its forwarded rows
    pub fn delete_forwarding_config(&self, id: u64) -> Result<bool> {
        let _guard = self.writer()?;
        if self.get_forwarding_config(id)?.is_none() {
            return Ok(false);
        }

        let mut batch = self.keyspace.batch();
        let removed_forwards = self.remove_forwards_for(&mut batch, &[id])?;
        batch.remove(&self.rules, encode_rule_key(id));
        batch.commit()?;

        debug!(forwarding_config_id = id, removed_forwards, "Deleted forwarding config");
        Ok(true)
    }

    fn remove_forwards_for(&self, batch: &mut Batch, rule_ids: &[u64]) -> Result<usize> {
        if rule_ids.is_empty() {
            return Ok(0);
        }
        let mut removed = 0;
        for item in self.forwarded.iter() {
            let (key, value) = item?;
            let row: ForwardedMessage = serde_json::from_slice(&value)?;
            if rule_ids.contains(&row.forwarding_config_id) {
                batch.remove(&self.forwarded, key.to_vec());
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ---- messages ----

    pub fn insert_received(&self, new: NewReceivedMessage) -> Result<ReceivedMessage> {
        let _guard = self.writer()?;
        let mut batch = self.keyspace.batch();

        let id = self.allocate_id(&mut batch, Sequence::Received)?;
        let message = ReceivedMessage {
            id,
            payload: new.payload,
            source: new.source,
            buffer_config_id: new.buffer_config_id,
            received_at: Utc::now(),
            processed: false,
            forwarded_id: None,
            status: None,
        };
        Self::put_json(&mut batch, &self.received, encode_received_key(id), &message)?;
        batch.commit()?;
        Ok(message)
    }

    pub fn get_received(&self, id: u64) -> Result<Option<ReceivedMessage>> {
        Self::get_json(&self.received, encode_received_key(id))
    }

    pub fn recent_received(&self, limit: usize) -> Result<Vec<ReceivedMessage>> {
        Self::scan_recent(&self.received, limit)
    }

    /// Append the forwarded row representing one batch sent through one rule.
    /// Fails with [`LedgerError::RuleNotFound`] if the rule was deleted meanwhile.
    pub fn record_forward(&self, new: NewForwardedMessage) -> Result<ForwardedMessage> {
        let _guard = self.writer()?;
        if !self.rules.contains_key(encode_rule_key(new.forwarding_config_id))? {
            return Err(LedgerError::RuleNotFound(new.forwarding_config_id));
        }
        let mut batch = self.keyspace.batch();

        let id = self.allocate_id(&mut batch, Sequence::Forwarded)?;
        let row = ForwardedMessage {
            id,
            received_message_id: new.received_message_id,
            forwarding_config_id: new.forwarding_config_id,
            status: new.status,
            response: new.response,
            forwarded_at: Utc::now(),
        };
        Self::put_json(&mut batch, &self.forwarded, encode_forwarded_key(id), &row)?;
        batch.commit()?;
        Ok(row)
    }

    pub fn get_forwarded(&self, id: u64) -> Result<Option<ForwardedMessage>> {
        Self::get_json(&self.forwarded, encode_forwarded_key(id))
    }

    pub fn recent_forwarded(&self, limit: usize) -> Result<Vec<ForwardedMessage>> {
        Self::scan_recent(&self.forwarded, limit)
    }

    /// Mark a batch of received messages processed with one status.
    /// `forwarded_id` replaces the stored link only when given.
    pub fn mark_messages(
        &self,
        ids: &[u64],
        status: MessageStatus,
        forwarded_id: Option<u64>,
    ) -> Result<usize> {
        let _guard = self.writer()?;
        let mut batch = self.keyspace.batch();
        let mut updated = 0;

        for id in ids {
            let Some(mut message) = self.get_received(*id)? else {
                continue;
            };
            message.processed = true;
            message.status = Some(status);
            if forwarded_id.is_some() {
                message.forwarded_id = forwarded_id;
            }
            Self::put_json(&mut batch, &self.received, encode_received_key(*id), &message)?;
            updated += 1;
        }
        batch.commit()?;

        debug!(updated, status = status.as_str(), "Marked messages");
        Ok(updated)
    }

    // ---- snapshot / restore ----

    pub fn snapshot(&self) -> Result<Snapshot> {
        let mut executions: Vec<Execution> = Self::scan(&self.executions)?;
        executions.sort_by_key(|e| e.id);

        Ok(Snapshot {
            schedules: Self::scan(&self.schedules)?,
            executions,
            buffer_configs: Self::scan(&self.buffers)?,
            forwarding_configs: Self::scan(&self.rules)?,
        })
    }

    /// Replace schedules, executions, buffer configs and forwarding configs with the
    /// snapshot contents. Id sequences are advanced past every imported id.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<()> {
        let _guard = self.writer()?;
        let mut batch = self.keyspace.batch();

        for partition in [&self.schedules, &self.executions, &self.buffers, &self.rules] {
            for item in partition.iter() {
                let (key, _) = item?;
                batch.remove(partition, key.to_vec());
            }
        }

        for schedule in &snapshot.schedules {
            Self::put_json(&mut batch, &self.schedules, encode_schedule_key(schedule.id), schedule)?;
        }
        for execution in &snapshot.executions {
            Self::put_json(
                &mut batch,
                &self.executions,
                encode_execution_key(execution.schedule_id, execution.id),
                execution,
            )?;
        }
        for config in &snapshot.buffer_configs {
            Self::put_json(&mut batch, &self.buffers, encode_buffer_key(config.id), config)?;
        }
        for config in &snapshot.forwarding_configs {
            Self::put_json(&mut batch, &self.rules, encode_rule_key(config.id), config)?;
        }

        let highest = [
            (Sequence::Schedule, snapshot.schedules.iter().map(|s| s.id).max()),
            (Sequence::Execution, snapshot.executions.iter().map(|e| e.id).max()),
            (Sequence::Buffer, snapshot.buffer_configs.iter().map(|b| b.id).max()),
            (Sequence::Rule, snapshot.forwarding_configs.iter().map(|r| r.id).max()),
        ];
        for (sequence, max_id) in highest {
            let current = self.read_counter(sequence)?;
            let next = current.max(max_id.unwrap_or(0));
            batch.insert(
                &self.metadata,
                encode_sequence_key(sequence),
                next.to_string().into_bytes(),
            );
        }

        batch.commit()?;
        info!(
            schedules = snapshot.schedules.len(),
            executions = snapshot.executions.len(),
            buffer_configs = snapshot.buffer_configs.len(),
            forwarding_configs = snapshot.forwarding_configs.len(),
            "Restored ledger snapshot"
        );
        Ok(())
    }

    // ---- maintenance ----

    /// Prune expired entries based on retention policies
    pub fn prune_expired(&self, policy: &RetentionPolicy) -> Result<PruneStats> {
        self.prune_expired_at(policy, Utc::now())
    }

    pub fn prune_expired_at(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Result<PruneStats> {
        let _guard = self.writer()?;
        let targets = PruneTargets {
            executions: &self.executions,
            received: &self.received,
            forwarded: &self.forwarded,
            metadata: &self.metadata,
        };
        prune_expired(&self.keyspace, &targets, policy, now)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Row counts per partition (for health reporting)
    pub fn stats(&self) -> Result<LedgerStats> {
        let count = |partition: &PartitionHandle| -> Result<usize> {
            let mut n = 0;
            for item in partition.iter() {
                item?;
                n += 1;
            }
            Ok(n)
        };

        Ok(LedgerStats {
            schedules: count(&self.schedules)?,
            executions: count(&self.executions)?,
            buffer_configs: count(&self.buffers)?,
            forwarding_configs: count(&self.rules)?,
            received: count(&self.received)?,
            forwarded: count(&self.forwarded)?,
        })
    }

    /// Ids currently stored in the schedules partition
    pub fn schedule_ids(&self) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for item in self.schedules.iter() {
            let (key, _) = item?;
            if let Some(id) = decode_id_key(&key, "sched") {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub schedules: usize,
    pub executions: usize,
    pub buffer_configs: usize,
    pub forwarding_configs: usize,
    pub received: usize,
    pub forwarded: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::records::{
        ExecutionStatus, ForwardRecord, HeaderMap, HttpMethod, SentRecord,
    };
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_ledger() -> (Ledger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Ledger::open(temp_dir.path().join("test_ledger")).unwrap();
        (ledger, temp_dir)
    }

    fn schedule_fields(name: &str) -> ScheduleFields {
        ScheduleFields {
            name: name.to_string(),
            cron_expression: "*/5 * * * *".to_string(),
            url: "https://example.com/hook".to_string(),
            method: HttpMethod::Post,
            headers: HeaderMap::new(),
            body: Some(r#"{"ping":true}"#.to_string()),
        }
    }

    fn buffer_fields() -> BufferConfigFields {
        BufferConfigFields {
            name: "orders".to_string(),
            filter_field: "order_id".to_string(),
            max_size: 3,
            max_time_secs: 60,
            reset_timer_on_message: true,
            active: true,
        }
    }

    fn rule_fields(buffer_config_id: u64, active: bool) -> ForwardingConfigFields {
        ForwardingConfigFields {
            buffer_config_id,
            name: "downstream".to_string(),
            url: "https://example.com/forward".to_string(),
            method: HttpMethod::Post,
            headers: HeaderMap::new(),
            fields: None,
            template: None,
            active,
        }
    }

    fn execution(schedule: &Schedule) -> NewExecution {
        NewExecution {
            schedule_id: schedule.id,
            schedule_name: schedule.fields.name.clone(),
            status: ExecutionStatus::Success,
            response: "ok".to_string(),
        }
    }

    fn forward(received_message_id: u64, forwarding_config_id: u64) -> NewForwardedMessage {
        NewForwardedMessage {
            received_message_id,
            forwarding_config_id,
            status: MessageStatus::Success,
            response: ForwardRecord {
                sent: SentRecord {
                    payload: json!({"content": []}),
                    headers: HeaderMap::new(),
                },
                response: None,
                error: None,
            },
        }
    }

    #[test]
    fn test_ids_are_monotonic_and_never_reused() {
        let (ledger, _temp) = create_test_ledger();

        let first = ledger.insert_schedule(schedule_fields("a"), true).unwrap();
        let second = ledger.insert_schedule(schedule_fields("b"), true).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        assert!(ledger.delete_schedule(second.id).unwrap());
        let third = ledger.insert_schedule(schedule_fields("b"), true).unwrap();
        assert_eq!(third.id, 3);
    }

    #[test]
    fn test_sequence_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger");
        {
            let ledger = Ledger::open(&path).unwrap();
            ledger.insert_schedule(schedule_fields("a"), true).unwrap();
            ledger.persist().unwrap();
        }

        let ledger = Ledger::open(&path).unwrap();
        let schedule = ledger.insert_schedule(schedule_fields("b"), true).unwrap();
        assert_eq!(schedule.id, 2);
    }

    #[test]
    fn test_update_preserves_active_flag() {
        let (ledger, _temp) = create_test_ledger();
        let schedule = ledger.insert_schedule(schedule_fields("a"), false).unwrap();

        let mut fields = schedule_fields("renamed");
        fields.cron_expression = "0 * * * *".to_string();
        let updated = ledger.update_schedule(schedule.id, fields).unwrap().unwrap();

        assert_eq!(updated.fields.name, "renamed");
        assert!(!updated.active);
        assert_eq!(updated.created_at, schedule.created_at);
        assert!(ledger.update_schedule(99, schedule_fields("x")).unwrap().is_none());
    }

    #[test]
    fn test_list_active_schedules() {
        let (ledger, _temp) = create_test_ledger();
        let a = ledger.insert_schedule(schedule_fields("a"), true).unwrap();
        let b = ledger.insert_schedule(schedule_fields("b"), true).unwrap();
        ledger.set_schedule_active(b.id, false).unwrap();

        let active: Vec<u64> = ledger.list_active_schedules().unwrap().iter().map(|s| s.id).collect();
        assert_eq!(active, vec![a.id]);

        let all: Vec<u64> = ledger.list_schedules().unwrap().iter().map(|s| s.id).collect();
        assert_eq!(all, vec![b.id, a.id]);
    }

    #[test]
    fn test_delete_schedule_cascades_executions() {
        let (ledger, _temp) = create_test_ledger();
        let doomed = ledger.insert_schedule(schedule_fields("doomed"), true).unwrap();
        let kept = ledger.insert_schedule(schedule_fields("kept"), true).unwrap();

        ledger.append_execution(execution(&doomed)).unwrap();
        ledger.append_execution(execution(&doomed)).unwrap();
        ledger.append_execution(execution(&kept)).unwrap();

        assert!(ledger.delete_schedule(doomed.id).unwrap());
        assert!(ledger.get_schedule(doomed.id).unwrap().is_none());
        assert!(ledger.list_executions(Some(doomed.id)).unwrap().is_empty());
        assert_eq!(ledger.list_executions(None).unwrap().len(), 1);
        assert!(!ledger.delete_schedule(doomed.id).unwrap());
    }

    #[test]
    fn test_executions_newest_first() {
        let (ledger, _temp) = create_test_ledger();
        let a = ledger.insert_schedule(schedule_fields("a"), true).unwrap();
        let b = ledger.insert_schedule(schedule_fields("b"), true).unwrap();

        let e1 = ledger.append_execution(execution(&b)).unwrap();
        let e2 = ledger.append_execution(execution(&a)).unwrap();
        let e3 = ledger.append_execution(execution(&b)).unwrap();

        let ids: Vec<u64> = ledger.list_executions(None).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![e3.id, e2.id, e1.id]);

        let only_b: Vec<u64> = ledger.list_executions(Some(b.id)).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(only_b, vec![e3.id, e1.id]);
    }

    #[test]
    fn test_forwarding_config_requires_buffer() {
        let (ledger, _temp) = create_test_ledger();
        let err = ledger.insert_forwarding_config(rule_fields(42, true)).unwrap_err();
        assert!(matches!(err, LedgerError::BufferNotFound(42)));
    }

    #[test]
    fn test_active_rules_filtered_by_buffer() {
        let (ledger, _temp) = create_test_ledger();
        let buffer = ledger.insert_buffer_config(buffer_fields()).unwrap();
        let other = ledger.insert_buffer_config(buffer_fields()).unwrap();

        let r1 = ledger.insert_forwarding_config(rule_fields(buffer.id, true)).unwrap();
        ledger.insert_forwarding_config(rule_fields(buffer.id, false)).unwrap();
        ledger.insert_forwarding_config(rule_fields(other.id, true)).unwrap();
        let r4 = ledger.insert_forwarding_config(rule_fields(buffer.id, true)).unwrap();

        let ids: Vec<u64> = ledger.list_active_rules(buffer.id).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![r1.id, r4.id]);
    }

    #[test]
    fn test_delete_buffer_cascades_rules_and_forwards() {
        let (ledger, _temp) = create_test_ledger();
        let buffer = ledger.insert_buffer_config(buffer_fields()).unwrap();
        let rule = ledger.insert_forwarding_config(rule_fields(buffer.id, true)).unwrap();
        let message = ledger
            .insert_received(NewReceivedMessage {
                payload: json!({"order_id": 1}),
                source: "127.0.0.1".to_string(),
                buffer_config_id: buffer.id,
            })
            .unwrap();
        let row = ledger.record_forward(forward(message.id, rule.id)).unwrap();

        assert!(ledger.delete_buffer_config(buffer.id).unwrap());
        assert!(ledger.get_forwarding_config(rule.id).unwrap().is_none());
        assert!(ledger.get_forwarded(row.id).unwrap().is_none());
        assert!(ledger.get_received(message.id).unwrap().is_some());
    }

    #[test]
    fn test_delete_rule_cascades_forwards() {
        let (ledger, _temp) = create_test_ledger();
        let buffer = ledger.insert_buffer_config(buffer_fields()).unwrap();
        let doomed = ledger.insert_forwarding_config(rule_fields(buffer.id, true)).unwrap();
        let kept = ledger.insert_forwarding_config(rule_fields(buffer.id, true)).unwrap();

        let gone = ledger.record_forward(forward(1, doomed.id)).unwrap();
        let stays = ledger.record_forward(forward(1, kept.id)).unwrap();

        assert!(ledger.delete_forwarding_config(doomed.id).unwrap());
        assert!(ledger.get_forwarded(gone.id).unwrap().is_none());
        assert!(ledger.get_forwarded(stays.id).unwrap().is_some());
        assert!(ledger.get_buffer_config(buffer.id).unwrap().is_some());
    }

    #[test]
    fn test_execution_rejected_after_schedule_delete() {
        let (ledger, _temp) = create_test_ledger();
        let schedule = ledger.insert_schedule(schedule_fields("late"), true).unwrap();
        assert!(ledger.delete_schedule(schedule.id).unwrap());

        let err = ledger.append_execution(execution(&schedule)).unwrap_err();
        assert!(matches!(err, LedgerError::ScheduleNotFound(id) if id == schedule.id));
        assert!(ledger.list_executions(None).unwrap().is_empty());
    }

    #[test]
    fn test_forward_rejected_after_rule_delete() {
        let (ledger, _temp) = create_test_ledger();
        let buffer = ledger.insert_buffer_config(buffer_fields()).unwrap();
        let rule = ledger.insert_forwarding_config(rule_fields(buffer.id, true)).unwrap();
        assert!(ledger.delete_forwarding_config(rule.id).unwrap());

        let err = ledger.record_forward(forward(1, rule.id)).unwrap_err();
        assert!(matches!(err, LedgerError::RuleNotFound(id) if id == rule.id));
        assert_eq!(ledger.stats().unwrap().forwarded, 0);
    }

    #[test]
    fn test_mark_messages() {
        let (ledger, _temp) = create_test_ledger();
        let ids: Vec<u64> = (0..3)
            .map(|n| {
                ledger
                    .insert_received(NewReceivedMessage {
                        payload: json!({"n": n}),
                        source: "unknown".to_string(),
                        buffer_config_id: 1,
                    })
                    .unwrap()
                    .id
            })
            .collect();

        let updated = ledger.mark_messages(&ids[..2], MessageStatus::Success, Some(9)).unwrap();
        assert_eq!(updated, 2);

        let first = ledger.get_received(ids[0]).unwrap().unwrap();
        assert!(first.processed);
        assert_eq!(first.status, Some(MessageStatus::Success));
        assert_eq!(first.forwarded_id, Some(9));

        ledger.mark_messages(&ids[..1], MessageStatus::Cancelled, None).unwrap();
        let first = ledger.get_received(ids[0]).unwrap().unwrap();
        assert_eq!(first.status, Some(MessageStatus::Cancelled));
        assert_eq!(first.forwarded_id, Some(9));

        let untouched = ledger.get_received(ids[2]).unwrap().unwrap();
        assert!(!untouched.processed);
        assert_eq!(untouched.status, None);
    }

    #[test]
    fn test_recent_messages_limit_and_order() {
        let (ledger, _temp) = create_test_ledger();
        for n in 0..5 {
            ledger
                .insert_received(NewReceivedMessage {
                    payload: json!({"n": n}),
                    source: "unknown".to_string(),
                    buffer_config_id: 1,
                })
                .unwrap();
        }

        let recent = ledger.recent_received(3).unwrap();
        let ids: Vec<u64> = recent.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }

    #[test]
    fn test_snapshot_restore_advances_sequences() {
        let (source, _t1) = create_test_ledger();
        let schedule = source.insert_schedule(schedule_fields("a"), true).unwrap();
        source.insert_schedule(schedule_fields("b"), false).unwrap();
        source.append_execution(execution(&schedule)).unwrap();
        let buffer = source.insert_buffer_config(buffer_fields()).unwrap();
        source.insert_forwarding_config(rule_fields(buffer.id, true)).unwrap();
        let snapshot = source.snapshot().unwrap();

        let (target, _t2) = create_test_ledger();
        target.insert_schedule(schedule_fields("stale"), true).unwrap();
        target.restore(&snapshot).unwrap();

        assert_eq!(target.snapshot().unwrap(), snapshot);
        let next = target.insert_schedule(schedule_fields("c"), true).unwrap();
        assert_eq!(next.id, 3);
    }

    #[test]
    fn test_stats() {
        let (ledger, _temp) = create_test_ledger();
        let schedule = ledger.insert_schedule(schedule_fields("a"), true).unwrap();
        ledger.append_execution(execution(&schedule)).unwrap();

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.schedules, 1);
        assert_eq!(stats.executions, 1);
        assert_eq!(stats.received, 0);
        assert_eq!(ledger.schedule_ids().unwrap(), vec![schedule.id]);
    }
}
