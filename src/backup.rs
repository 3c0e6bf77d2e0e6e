//! Snapshot export/import of schedules, executions and buffer/forwarding configs
//! Uses Apache Arrow object_store crate

use chrono::{DateTime, Utc};
use object_store::{ObjectStore, local::LocalFileSystem, path::Path as StoragePath};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::ledger::Snapshot;
use crate::storage::{Storage, StorageError};

const SNAPSHOT_KEY: &str = "snapshot.json";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("No snapshot found at {0}")]
    NotFound(String),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backup directory error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;

/// On-disk document: the snapshot plus where it came from
#[derive(Debug, Serialize, Deserialize)]
struct BackupDocument {
    backup_id: String,
    created_at: DateTime<Utc>,
    #[serde(flatten)]
    snapshot: Snapshot,
}

/// What an export or import moved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupSummary {
    pub backup_id: String,
    pub key: String,
    pub schedules: usize,
    pub executions: usize,
    pub buffer_configs: usize,
    pub forwarding_configs: usize,
}

impl BackupSummary {
    fn new(backup_id: String, key: &str, snapshot: &Snapshot) -> Self {
        Self {
            backup_id,
            key: key.to_string(),
            schedules: snapshot.schedules.len(),
            executions: snapshot.executions.len(),
            buffer_configs: snapshot.buffer_configs.len(),
            forwarding_configs: snapshot.forwarding_configs.len(),
        }
    }
}

#[derive(Clone)]
pub struct BackupStore {
    store: Arc<dyn ObjectStore>,
}

impl BackupStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Backups under a local directory, created if missing
    pub fn local(dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let store = LocalFileSystem::new_with_prefix(dir.as_ref())?;
        Ok(Self::new(Arc::new(store)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()))
    }

    /// Write the current tables to `snapshot.json`, replacing the previous one
    pub async fn export(&self, storage: &Storage) -> Result<BackupSummary> {
        let snapshot = storage.call("snapshot", |ledger| ledger.snapshot()).await?;
        let document = BackupDocument {
            backup_id: Uuid::now_v7().to_string(),
            created_at: Utc::now(),
            snapshot,
        };

        let data = serde_json::to_vec_pretty(&document)?;
        let size = data.len();
        self.store
            .put(&StoragePath::from(SNAPSHOT_KEY), data.into())
            .await?;

        let summary = BackupSummary::new(document.backup_id, SNAPSHOT_KEY, &document.snapshot);
        info!(
            backup_id = %summary.backup_id,
            size,
            schedules = summary.schedules,
            executions = summary.executions,
            "Snapshot exported"
        );
        Ok(summary)
    }

    /// Replace the four tables with the contents of `snapshot.json`
    pub async fn import(&self, storage: &Storage) -> Result<BackupSummary> {
        let path = StoragePath::from(SNAPSHOT_KEY);
        let bytes = match self.store.get(&path).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(BackupError::NotFound(SNAPSHOT_KEY.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let document: BackupDocument = serde_json::from_slice(&bytes)?;
        storage
            .call("restore", |ledger| ledger.restore(&document.snapshot))
            .await?;

        let summary = BackupSummary::new(document.backup_id, SNAPSHOT_KEY, &document.snapshot);
        info!(
            backup_id = %summary.backup_id,
            created_at = %document.created_at,
            schedules = summary.schedules,
            "Snapshot imported"
        );
        Ok(summary)
    }

    pub async fn exists(&self) -> Result<bool> {
        match self.store.head(&StoragePath::from(SNAPSHOT_KEY)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
