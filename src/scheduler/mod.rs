//! Cron-scheduled outbound calls
//!
//! [`CronClock`] owns the live triggers, [`TriggerSynchronizer`] keeps them in step
//! with persisted schedules, and [`Dispatcher`] performs each firing.

pub mod clock;
pub mod crontab;
pub mod synchronizer;

pub use clock::{ClockError, CronClock, FireHandler};
pub use crontab::CronError;
pub use synchronizer::{Dispatcher, SyncError, TriggerReport, TriggerSynchronizer};
