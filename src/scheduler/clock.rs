//! Live cron trigger registry
//!
//! One tokio task per armed trigger sleeps until the next occurrence and hands the
//! trigger id to its [`FireHandler`]. Occurrences missed while a firing was still
//! running are coalesced into the next one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::crontab::{self, CronError};

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("Trigger already registered: {0}")]
    AlreadyRegistered(u64),

    #[error(transparent)]
    InvalidExpression(#[from] CronError),
}

pub type Result<T> = std::result::Result<T, ClockError>;

/// Invoked at every occurrence of a trigger
#[async_trait]
pub trait FireHandler: Send + Sync {
    async fn fire(&self, trigger_id: u64);
}

struct Trigger {
    schedule: Arc<::cron::Schedule>,
    expression: String,
    handler: Arc<dyn FireHandler>,
    task: Option<AbortHandle>,
}

#[derive(Default)]
struct ClockState {
    running: bool,
    triggers: HashMap<u64, Trigger>,
}

/// Owned cron clock. Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct CronClock {
    state: Arc<Mutex<ClockState>>,
}

impl CronClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ClockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Arm every registered trigger
    pub fn start(&self) {
        let mut state = self.state();
        if state.running {
            return;
        }
        state.running = true;

        for (id, trigger) in state.triggers.iter_mut() {
            if trigger.task.is_none() {
                trigger.task = Some(arm(*id, trigger.schedule.clone(), trigger.handler.clone()));
            }
        }
        info!(triggers = state.triggers.len(), "Cron clock started");
    }

    /// Disarm every trigger; registrations are kept
    pub fn stop(&self) {
        let mut state = self.state();
        state.running = false;
        for trigger in state.triggers.values_mut() {
            if let Some(task) = trigger.task.take() {
                task.abort();
            }
        }
        info!("Cron clock stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn register(&self, id: u64, expression: &str, handler: Arc<dyn FireHandler>) -> Result<()> {
        let schedule = Arc::new(crontab::parse(expression)?);

        let mut state = self.state();
        if state.triggers.contains_key(&id) {
            return Err(ClockError::AlreadyRegistered(id));
        }

        let task = state
            .running
            .then(|| arm(id, schedule.clone(), handler.clone()));
        state.triggers.insert(
            id,
            Trigger {
                schedule,
                expression: expression.trim().to_string(),
                handler,
                task,
            },
        );

        debug!(trigger_id = id, expression, "Trigger registered");
        Ok(())
    }

    /// Remove a trigger. Returns whether it existed.
    pub fn unregister(&self, id: u64) -> bool {
        let removed = self.state().triggers.remove(&id);
        match removed {
            Some(trigger) => {
                if let Some(task) = trigger.task {
                    task.abort();
                }
                debug!(trigger_id = id, "Trigger unregistered");
                true
            }
            None => false,
        }
    }

    pub fn exists(&self, id: u64) -> bool {
        self.state().triggers.contains_key(&id)
    }

    /// Registered ids, ascending
    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.state().triggers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn expression(&self, id: u64) -> Option<String> {
        self.state().triggers.get(&id).map(|t| t.expression.clone())
    }

    /// Unregister everything
    pub fn clear(&self) -> usize {
        let mut state = self.state();
        let count = state.triggers.len();
        for (_, trigger) in state.triggers.drain() {
            if let Some(task) = trigger.task {
                task.abort();
            }
        }
        count
    }
}

fn arm(id: u64, schedule: Arc<::cron::Schedule>, handler: Arc<dyn FireHandler>) -> AbortHandle {
    tokio::spawn(run_trigger(id, schedule, handler)).abort_handle()
}

/// Wall-clock time derived from the tokio clock, so paused-time tests stay consistent
struct Anchor {
    instant: Instant,
    wall: DateTime<Utc>,
}

impl Anchor {
    fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: Utc::now(),
        }
    }

    fn wall_now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.instant.elapsed()).unwrap_or_default();
        self.wall + elapsed
    }

    fn instant_at(&self, at: DateTime<Utc>) -> Instant {
        let offset = (at - self.wall).to_std().unwrap_or(Duration::ZERO);
        self.instant + offset
    }
}

async fn run_trigger(id: u64, schedule: Arc<::cron::Schedule>, handler: Arc<dyn FireHandler>) {
    let anchor = Anchor::now();
    let mut cursor = anchor.wall;

    loop {
        let Some(next) = crontab::next_after(&schedule, &cursor) else {
            warn!(trigger_id = id, "Schedule has no future occurrence, trigger idle");
            return;
        };

        tokio::time::sleep_until(anchor.instant_at(next)).await;
        debug!(trigger_id = id, occurrence = %next, "Trigger firing");

        // A separate task so unregistering never cancels a firing in flight
        let fire_handler = handler.clone();
        if let Err(err) = tokio::spawn(async move { fire_handler.fire(id).await }).await {
            warn!(trigger_id = id, error = %err, "Trigger handler panicked");
        }

        // Skip occurrences that passed while the handler ran
        cursor = next.max(anchor.wall_now());
    }
}
