//! Keeps the live trigger set equal to the set of active schedules in storage

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::clock::{ClockError, CronClock, FireHandler};
use super::crontab;
use crate::dispatch::{HttpCaller, OutboundRequest, RequestBody};
use crate::ledger::{
    Execution, ExecutionStatus, LedgerError, NewExecution, Schedule, ScheduleFields,
};
use crate::observability::Metrics;
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Schedule not found: {0}")]
    NotFound(u64),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error("Trigger set out of sync: missing {missing:?}, orphaned {orphaned:?}")]
    Desync { missing: Vec<u64>, orphaned: Vec<u64> },
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Live trigger ids next to the persisted active ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerReport {
    pub live: Vec<u64>,
    pub active: Vec<u64>,
    pub in_sync: bool,
}

/// Runs one schedule occurrence: re-check the active flag, call, record the outcome
pub struct Dispatcher {
    storage: Storage,
    caller: Arc<dyn HttpCaller>,
    request_timeout: Duration,
    metrics: Arc<Metrics>,
    gate: Arc<Mutex<()>>,
}

impl Dispatcher {
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
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Dispatch schedule `id` using its current persisted row.
    /// Returns `None` when the schedule is gone or inactive.
    pub async fn dispatch(&self, id: u64) -> std::result::Result<Option<Execution>, StorageError> {
        let schedule = {
            let _gate = self.gate.lock().await;
            self.storage
                .call("get_schedule", |ledger| ledger.get_schedule(id))
                .await?
        };

        let schedule = match schedule {
            Some(schedule) if schedule.active => schedule,
            Some(_) => {
                self.metrics.execution_skipped();
                info!(schedule_id = id, "Schedule inactive, skipping dispatch");
                return Ok(None);
            }
            None => {
                self.metrics.execution_skipped();
                warn!(schedule_id = id, "Schedule no longer exists, skipping dispatch");
                return Ok(None);
            }
        };

        let fields = &schedule.fields;
        let request = OutboundRequest::builder()
            .method(fields.method)
            .url(fields.url.clone())
            .headers(fields.headers.clone())
            .body(RequestBody::from_stored(fields.body.as_deref()))
            .timeout(self.request_timeout)
            .build();

        let (status, response) = match self.caller.call(&request).await {
            Ok(response) if response.is_success() => (ExecutionStatus::Success, response.body),
            Ok(response) => (
                ExecutionStatus::Error,
                format!("HTTP {}: {}", response.status, response.body),
            ),
            Err(err) => (ExecutionStatus::Error, err.to_string()),
        };

        match status {
            ExecutionStatus::Success => self.metrics.execution_succeeded(),
            ExecutionStatus::Error => self.metrics.execution_failed(),
        }

        let appended = self
            .storage
            .call("append_execution", |ledger| {
                ledger.append_execution(NewExecution {
                    schedule_id: schedule.id,
                    schedule_name: schedule.fields.name.clone(),
                    status,
                    response: response.clone(),
                })
            })
            .await;

        // Deleted while the request was in flight: the cascade already ran
        let execution = match appended {
            Ok(execution) => execution,
            Err(StorageError::Ledger(LedgerError::ScheduleNotFound(_))) => {
                info!(schedule_id = id, "Schedule deleted during dispatch, result dropped");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        info!(
            schedule_id = id,
            name = %schedule.fields.name,
            status = status.as_str(),
            "Schedule dispatched"
        );
        Ok(Some(execution))
    }
}

#[async_trait]
impl FireHandler for Dispatcher {
    async fn fire(&self, trigger_id: u64) {
        if let Err(err) = self.dispatch(trigger_id).await {
            error!(schedule_id = trigger_id, error = %err, "Dispatch failed");
        }
    }
}

/// Owns the mapping between persisted schedules and live cron triggers.
///
/// Every mutation holds the dispatch gate, so a firing never observes a flag write
/// without the matching trigger change.
pub struct TriggerSynchronizer {
    storage: Storage,
    clock: CronClock,
    dispatcher: Arc<Dispatcher>,
}

impl TriggerSynchronizer {
    pub fn new(storage: Storage, clock: CronClock, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            storage,
            clock,
            dispatcher,
        }
    }

    pub fn clock(&self) -> &CronClock {
        &self.clock
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    fn register(&self, schedule: &Schedule) -> std::result::Result<(), ClockError> {
        let handler: Arc<dyn FireHandler> = self.dispatcher.clone();
        self.clock
            .register(schedule.id, &schedule.fields.cron_expression, handler)
    }

    /// Persist a new schedule and, when active, register its trigger.
    /// A failed registration removes the row again.
    pub async fn create(&self, fields: ScheduleFields, active: bool) -> Result<Schedule> {
        crontab::validate(&fields.cron_expression).map_err(ClockError::from)?;
        let _gate = self.dispatcher.gate.lock().await;

        let schedule = self
            .storage
            .call("insert_schedule", |ledger| ledger.insert_schedule(fields.clone(), active))
            .await?;

        if active {
            if let Err(err) = self.register(&schedule) {
                error!(schedule_id = schedule.id, error = %err, "Trigger registration failed, rolling back");
                let id = schedule.id;
                self.storage
                    .call("delete_schedule", |ledger| ledger.delete_schedule(id))
                    .await?;
                return Err(err.into());
            }
        }

        info!(schedule_id = schedule.id, name = %schedule.fields.name, active, "Schedule created");
        Ok(schedule)
    }

    /// Replace a schedule's fields; an active schedule gets a fresh trigger under the same id
    pub async fn update(&self, id: u64, fields: ScheduleFields) -> Result<Schedule> {
        crontab::validate(&fields.cron_expression).map_err(ClockError::from)?;
        let _gate = self.dispatcher.gate.lock().await;

        let schedule = self
            .storage
            .call("update_schedule", |ledger| ledger.update_schedule(id, fields.clone()))
            .await?
            .ok_or(SyncError::NotFound(id))?;

        if schedule.active {
            self.clock.unregister(id);
            self.register(&schedule)?;
        }

        info!(schedule_id = id, active = schedule.active, "Schedule updated");
        Ok(schedule)
    }

    pub async fn set_active(&self, id: u64, active: bool) -> Result<Schedule> {
        let _gate = self.dispatcher.gate.lock().await;
        self.set_active_locked(id, active).await
    }

    /// Flip the active flag
    pub async fn toggle(&self, id: u64) -> Result<Schedule> {
        let _gate = self.dispatcher.gate.lock().await;
        let current = self
            .storage
            .call("get_schedule", |ledger| ledger.get_schedule(id))
            .await?
            .ok_or(SyncError::NotFound(id))?;
        self.set_active_locked(id, !current.active).await
    }

    async fn set_active_locked(&self, id: u64, active: bool) -> Result<Schedule> {
        let schedule = self
            .storage
            .call("set_schedule_active", |ledger| ledger.set_schedule_active(id, active))
            .await?
            .ok_or(SyncError::NotFound(id))?;

        if active {
            if !self.clock.exists(id) {
                if let Err(err) = self.register(&schedule) {
                    error!(schedule_id = id, error = %err, "Trigger registration failed, reverting flag");
                    self.storage
                        .call("set_schedule_active", |ledger| ledger.set_schedule_active(id, false))
                        .await?;
                    return Err(err.into());
                }
            }
        } else {
            self.clock.unregister(id);
        }

        info!(schedule_id = id, active, "Schedule active flag set");
        Ok(schedule)
    }

    /// Remove the trigger, then the schedule and its executions
    pub async fn delete(&self, id: u64) -> Result<()> {
        let _gate = self.dispatcher.gate.lock().await;

        let had_trigger = self.clock.unregister(id);
        let deleted = self
            .storage
            .call("delete_schedule", |ledger| ledger.delete_schedule(id))
            .await?;
        if !deleted {
            return Err(SyncError::NotFound(id));
        }

        info!(schedule_id = id, had_trigger, "Schedule deleted");
        Ok(())
    }

    /// Register a trigger for every active schedule not yet registered.
    /// Schedules whose expression no longer parses are logged and skipped.
    pub async fn load_active(&self) -> Result<usize> {
        let schedules = self
            .storage
            .call("list_active_schedules", |ledger| ledger.list_active_schedules())
            .await?;

        let mut registered = 0;
        for schedule in &schedules {
            if self.clock.exists(schedule.id) {
                continue;
            }
            match self.register(schedule) {
                Ok(()) => registered += 1,
                Err(err) => error!(schedule_id = schedule.id, error = %err, "Failed to register trigger"),
            }
        }

        info!(active = schedules.len(), registered, "Active schedules loaded");
        Ok(registered)
    }

    /// Drop every trigger and rebuild the set from storage
    pub async fn resync(&self) -> Result<usize> {
        let _gate = self.dispatcher.gate.lock().await;
        let dropped = self.clock.clear();
        let registered = self.load_active().await?;
        info!(dropped, registered, "Triggers resynchronized");
        Ok(registered)
    }

    pub async fn report(&self) -> Result<TriggerReport> {
        let live = self.clock.ids();
        let mut active: Vec<u64> = self
            .storage
            .call("list_active_schedules", |ledger| ledger.list_active_schedules())
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();
        active.sort_unstable();

        let in_sync = live == active;
        Ok(TriggerReport { live, active, in_sync })
    }

    /// Fails with [`SyncError::Desync`] when live triggers and active rows differ
    pub async fn verify(&self) -> Result<()> {
        let report = self.report().await?;
        if report.in_sync {
            return Ok(());
        }

        let live: BTreeSet<u64> = report.live.into_iter().collect();
        let active: BTreeSet<u64> = report.active.into_iter().collect();
        Err(SyncError::Desync {
            missing: active.difference(&live).copied().collect(),
            orphaned: live.difference(&active).copied().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RecordingCaller;
    use crate::ledger::{HeaderMap, HttpMethod, Ledger};
    use crate::storage::RetryPolicy;
    use tempfile::TempDir;

    struct Harness {
        sync: TriggerSynchronizer,
        storage: Storage,
        caller: Arc<RecordingCaller>,
        metrics: Arc<Metrics>,
        _temp: TempDir,
    }

    fn harness() -> Harness {
        harness_with(RecordingCaller::new())
    }

    fn harness_with(caller: RecordingCaller) -> Harness {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(temp.path().join("ledger")).unwrap();
        let storage = Storage::with_policy(ledger, 5, Duration::from_secs(10), RetryPolicy::none());
        let caller = Arc::new(caller);
        let metrics = Arc::new(Metrics::new());
        let dispatcher = Arc::new(Dispatcher::new(
            storage.clone(),
            caller.clone(),
            Duration::from_secs(30),
            metrics.clone(),
        ));

        Harness {
            sync: TriggerSynchronizer::new(storage.clone(), CronClock::new(), dispatcher),
            storage,
            caller,
            metrics,
            _temp: temp,
        }
    }

    fn fields(name: &str, cron: &str) -> ScheduleFields {
        ScheduleFields {
            name: name.to_string(),
            cron_expression: cron.to_string(),
            url: format!("https://example.com/{}", name),
            method: HttpMethod::Post,
            headers: HeaderMap::new(),
            body: Some(r#"{"source": "cron"}"#.to_string()),
        }
    }

    impl Harness {
        async fn executions(&self, id: u64) -> Vec<Execution> {
            self.storage
                .call("list_executions", |ledger| ledger.list_executions(Some(id)))
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_create_registers_only_active() {
        let h = harness();
        let active = h.sync.create(fields("a", "*/5 * * * *"), true).await.unwrap();
        let inactive = h.sync.create(fields("b", "*/5 * * * *"), false).await.unwrap();

        assert!(h.sync.clock().exists(active.id));
        assert!(!h.sync.clock().exists(inactive.id));
        h.sync.verify().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_with_bad_cron_persists_nothing() {
        let h = harness();
        let err = h.sync.create(fields("bad", "99 * * * *"), true).await.unwrap_err();

        assert!(matches!(err, SyncError::Clock(ClockError::InvalidExpression(_))));
        let all = h.storage.call("list_schedules", |l| l.list_schedules()).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_create_rolls_back_when_registration_fails() {
        let h = harness();
        // Occupy the id the next insert will receive
        let handler: Arc<dyn FireHandler> = h.sync.dispatcher().clone();
        h.sync.clock().register(1, "0 0 * * *", handler).unwrap();

        let err = h.sync.create(fields("a", "*/5 * * * *"), true).await.unwrap_err();
        assert!(matches!(err, SyncError::Clock(ClockError::AlreadyRegistered(1))));

        let row = h.storage.call("get_schedule", |l| l.get_schedule(1)).await.unwrap();
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn test_toggle_off_removes_trigger_and_blocks_dispatch() {
        let h = harness();
        let schedule = h.sync.create(fields("a", "* * * * *"), true).await.unwrap();

        let toggled = h.sync.toggle(schedule.id).await.unwrap();
        assert!(!toggled.active);
        assert!(!h.sync.clock().exists(schedule.id));

        // a stale trigger firing after the toggle records nothing
        let outcome = h.sync.dispatcher().dispatch(schedule.id).await.unwrap();
        assert!(outcome.is_none());
        assert!(h.executions(schedule.id).await.is_empty());
        assert_eq!(h.caller.call_count(), 0);
        assert_eq!(h.metrics.snapshot().executions_skipped, 1);

        let toggled = h.sync.toggle(schedule.id).await.unwrap();
        assert!(toggled.active);
        assert!(h.sync.clock().exists(schedule.id));
    }

    #[tokio::test]
    async fn test_set_active_is_idempotent() {
        let h = harness();
        let schedule = h.sync.create(fields("a", "* * * * *"), true).await.unwrap();

        h.sync.set_active(schedule.id, true).await.unwrap();
        assert_eq!(h.sync.clock().ids(), vec![schedule.id]);

        h.sync.set_active(schedule.id, false).await.unwrap();
        h.sync.set_active(schedule.id, false).await.unwrap();
        assert!(h.sync.clock().ids().is_empty());

        let err = h.sync.set_active(404, true).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(404)));
    }

    #[tokio::test]
    async fn test_delete_cascades_and_recreate_gets_new_id() {
        let h = harness();
        let schedule = h.sync.create(fields("a", "*/10 * * * *"), true).await.unwrap();
        h.sync.dispatcher().dispatch(schedule.id).await.unwrap();
        h.sync.dispatcher().dispatch(schedule.id).await.unwrap();
        assert_eq!(h.executions(schedule.id).await.len(), 2);

        h.sync.delete(schedule.id).await.unwrap();
        assert!(!h.sync.clock().exists(schedule.id));
        assert!(h.executions(schedule.id).await.is_empty());
        assert!(matches!(
            h.sync.delete(schedule.id).await,
            Err(SyncError::NotFound(_))
        ));

        let again = h.sync.create(fields("a", "*/10 * * * *"), true).await.unwrap();
        assert_ne!(again.id, schedule.id);
        assert_eq!(h.sync.clock().ids(), vec![again.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_during_dispatch_leaves_no_execution() {
        let h = harness_with(RecordingCaller::new().with_delay(Duration::from_secs(5)));
        let schedule = h.sync.create(fields("slow", "0 0 * * *"), true).await.unwrap();

        let dispatcher = h.sync.dispatcher().clone();
        let id = schedule.id;
        let in_flight = tokio::spawn(async move { dispatcher.dispatch(id).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.caller.call_count(), 1);
        h.sync.delete(id).await.unwrap();

        let outcome = in_flight.await.unwrap().unwrap();
        assert!(outcome.is_none());
        assert!(h.executions(id).await.is_empty());
        let all = h.storage.call("list_executions", |l| l.list_executions(None)).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_during_dispatch_keeps_started_execution() {
        let h = harness_with(RecordingCaller::new().with_delay(Duration::from_secs(5)));
        let schedule = h.sync.create(fields("slow", "0 0 * * *"), true).await.unwrap();

        let dispatcher = h.sync.dispatcher().clone();
        let id = schedule.id;
        let in_flight = tokio::spawn(async move { dispatcher.dispatch(id).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        let toggled = h.sync.toggle(id).await.unwrap();
        assert!(!toggled.active);

        // the request already went out while active, so its result is kept
        let execution = in_flight.await.unwrap().unwrap().unwrap();
        assert_eq!(execution.schedule_id, id);
        assert_eq!(h.executions(id).await.len(), 1);

        // later firings see the inactive flag
        assert!(h.sync.dispatcher().dispatch(id).await.unwrap().is_none());
        assert_eq!(h.caller.call_count(), 1);
    }

    #[tokio::test]
    async fn test_update_reregisters_active_schedule() {
        let h = harness();
        let schedule = h.sync.create(fields("a", "*/5 * * * *"), true).await.unwrap();

        let updated = h.sync.update(schedule.id, fields("a2", "0 * * * *")).await.unwrap();
        assert!(updated.active);
        assert_eq!(h.sync.clock().expression(schedule.id).as_deref(), Some("0 * * * *"));

        let paused = h.sync.create(fields("b", "*/5 * * * *"), false).await.unwrap();
        h.sync.update(paused.id, fields("b", "0 0 * * *")).await.unwrap();
        assert!(!h.sync.clock().exists(paused.id));

        assert!(matches!(
            h.sync.update(999, fields("x", "* * * * *")).await,
            Err(SyncError::NotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_uses_current_row() {
        let h = harness();
        let schedule = h.sync.create(fields("a", "* * * * *"), true).await.unwrap();
        h.sync.update(schedule.id, fields("moved", "* * * * *")).await.unwrap();

        let execution = h.sync.dispatcher().dispatch(schedule.id).await.unwrap().unwrap();
        let calls = h.caller.calls();
        assert_eq!(calls[0].url, "https://example.com/moved");
        assert_eq!(
            calls[0].body,
            RequestBody::Json(serde_json::json!({"source": "cron"}))
        );
        assert_eq!(execution.schedule_name, "moved");
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.response, "ok");
    }

    #[tokio::test]
    async fn test_dispatch_records_failures() {
        let h = harness();
        let rejected = h.sync.create(fields("rejected", "* * * * *"), true).await.unwrap();
        let unreachable = h.sync.create(fields("unreachable", "* * * * *"), true).await.unwrap();
        h.caller.respond_to("https://example.com/rejected", 503, "maintenance");
        h.caller.fail_for("https://example.com/unreachable", "dns error");

        let first = h.sync.dispatcher().dispatch(rejected.id).await.unwrap().unwrap();
        assert_eq!(first.status, ExecutionStatus::Error);
        assert_eq!(first.response, "HTTP 503: maintenance");

        let second = h.sync.dispatcher().dispatch(unreachable.id).await.unwrap().unwrap();
        assert_eq!(second.status, ExecutionStatus::Error);
        assert_eq!(second.response, "HTTP request failed: dns error");

        assert_eq!(h.metrics.snapshot().executions_failed, 2);
    }

    #[tokio::test]
    async fn test_load_active_from_storage() {
        let h = harness();
        let a = h.sync.create(fields("a", "* * * * *"), true).await.unwrap();
        h.sync.create(fields("b", "* * * * *"), false).await.unwrap();

        // A fresh process: same storage, empty clock
        let fresh = TriggerSynchronizer::new(
            h.storage.clone(),
            CronClock::new(),
            h.sync.dispatcher().clone(),
        );
        assert_eq!(fresh.load_active().await.unwrap(), 1);
        assert_eq!(fresh.clock().ids(), vec![a.id]);
        assert_eq!(fresh.load_active().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_verify_and_resync() {
        let h = harness();
        let a = h.sync.create(fields("a", "* * * * *"), true).await.unwrap();
        let b = h.sync.create(fields("b", "* * * * *"), false).await.unwrap();

        h.sync.clock().unregister(a.id);
        let handler: Arc<dyn FireHandler> = h.sync.dispatcher().clone();
        h.sync.clock().register(b.id, "* * * * *", handler).unwrap();

        match h.sync.verify().await {
            Err(SyncError::Desync { missing, orphaned }) => {
                assert_eq!(missing, vec![a.id]);
                assert_eq!(orphaned, vec![b.id]);
            }
            other => panic!("expected desync, got {:?}", other),
        }

        assert_eq!(h.sync.resync().await.unwrap(), 1);
        h.sync.verify().await.unwrap();
        assert!(h.sync.report().await.unwrap().in_sync);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_firing_appends_execution() {
        let h = harness();
        let schedule = h.sync.create(fields("tick", "* * * * *"), true).await.unwrap();
        h.sync.clock().start();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!h.executions(schedule.id).await.is_empty());

        h.sync.toggle(schedule.id).await.unwrap();
        let before = h.executions(schedule.id).await.len();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.executions(schedule.id).await.len(), before);
    }
}
