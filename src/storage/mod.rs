//! Bounded access to the ledger
//!
//! Every ledger call goes through a fixed-size permit pool. A caller waits at most
//! `acquire_timeout` for a permit and then fails with the transient
//! [`StorageError::Busy`], which the [`RetryPolicy`] retries with linear backoff.

mod retry;

pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::StorageConfig;
use crate::ledger::{Ledger, LedgerError};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage busy: no connection available after {waited:?}")]
    Busy { waited: Duration },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl StorageError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Busy { .. } => true,
            StorageError::Ledger(LedgerError::Io(err)) => matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            StorageError::Ledger(_) => false,
        }
    }
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Ledger handle with pooled access and an explicit retry policy
#[derive(Clone)]
pub struct Storage {
    ledger: Ledger,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
    retry: RetryPolicy,
}

impl Storage {
    pub fn new(ledger: Ledger, config: &StorageConfig) -> Self {
        Self::with_policy(
            ledger,
            config.pool_size,
            config.acquire_timeout.as_duration(),
            RetryPolicy::from(&config.retry),
        )
    }

    pub fn with_policy(
        ledger: Ledger,
        pool_size: usize,
        acquire_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            acquire_timeout,
            retry,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        match tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            // Timed out, or the pool was closed
            _ => Err(StorageError::Busy {
                waited: self.acquire_timeout,
            }),
        }
    }

    /// Run one ledger operation under a pool permit, retrying transient failures
    pub async fn call<T, F>(&self, op_name: &'static str, op: F) -> Result<T>
    where
        F: Fn(&Ledger) -> crate::ledger::Result<T>,
    {
        let op = &op;
        self.retry
            .run(op_name, move || async move {
                let _permit = self.acquire().await?;
                debug!(op = op_name, "Storage call");
                op(&self.ledger).map_err(StorageError::from)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{HeaderMap, HttpMethod, ScheduleFields};
    use tempfile::TempDir;

    fn create_test_storage(pool_size: usize, retry: RetryPolicy) -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Ledger::open(temp_dir.path().join("ledger")).unwrap();
        let storage = Storage::with_policy(ledger, pool_size, Duration::from_secs(10), retry);
        (storage, temp_dir)
    }

    #[tokio::test]
    async fn test_call_runs_against_ledger() {
        let (storage, _temp) = create_test_storage(5, RetryPolicy::default());

        let schedule = storage
            .call("insert_schedule", |ledger| {
                ledger.insert_schedule(
                    ScheduleFields {
                        name: "nightly".to_string(),
                        cron_expression: "0 3 * * *".to_string(),
                        url: "https://example.com".to_string(),
                        method: HttpMethod::Get,
                        headers: HeaderMap::new(),
                        body: None,
                    },
                    true,
                )
            })
            .await
            .unwrap();

        let fetched = storage
            .call("get_schedule", |ledger| ledger.get_schedule(schedule.id))
            .await
            .unwrap();
        assert_eq!(fetched, Some(schedule));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_pool_reports_busy() {
        let (storage, _temp) = create_test_storage(1, RetryPolicy::none());
        let _held = storage.acquire().await.unwrap();

        let result = storage.call("stats", |ledger| ledger.stats()).await;
        assert!(matches!(result, Err(StorageError::Busy { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_pool_recovers_within_retry_budget() {
        let (storage, _temp) = create_test_storage(1, RetryPolicy::new(3, Duration::from_secs(1)));
        let held = storage.acquire().await.unwrap();

        // Release the permit while the first attempt is still waiting
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            drop(held);
        });

        let stats = storage.call("stats", |ledger| ledger.stats()).await.unwrap();
        assert_eq!(stats.schedules, 0);
    }

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::Busy { waited: Duration::ZERO }.is_transient());
        assert!(!StorageError::Ledger(LedgerError::BufferNotFound(3)).is_transient());
        assert!(
            StorageError::Ledger(LedgerError::Io(std::io::Error::from(
                std::io::ErrorKind::TimedOut
            )))
            .is_transient()
        );
    }
}
