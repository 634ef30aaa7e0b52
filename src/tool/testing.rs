//! In-memory [`BackupTool`] for tests.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BackupTool, DeleteOutcome, RemoteBackup, ToolError};
use crate::{
    config::StorageLocation,
    models::{KeepStatus, KeepTarget},
};

/// (backup_id, location_id)
type Pair = (String, String);

fn pair(backup_id: &str, location_id: &str) -> Pair {
    (backup_id.to_string(), location_id.to_string())
}

/// Records every call and answers from scripted state.
#[derive(Default)]
pub struct ScriptedTool {
    failing_deletes: Mutex<HashSet<Pair>>,
    erroring_deletes: Mutex<HashSet<Pair>>,
    keep: Mutex<HashMap<Pair, KeepStatus>>,
    remote: Mutex<HashMap<String, Vec<RemoteBackup>>>,
    deletes: Mutex<Vec<Pair>>,
    delete_delay: Mutex<Option<Duration>>,
}

impl ScriptedTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tool runs but reports failure for this pair.
    pub fn fail_delete(&self, backup_id: &str, location_id: &str) {
        self.failing_deletes
            .lock()
            .insert(pair(backup_id, location_id));
    }

    /// The tool does not run to completion for this pair.
    pub fn error_delete(&self, backup_id: &str, location_id: &str) {
        self.erroring_deletes
            .lock()
            .insert(pair(backup_id, location_id));
    }

    pub fn set_status(&self, backup_id: &str, location_id: &str, status: KeepStatus) {
        self.keep.lock().insert(pair(backup_id, location_id), status);
    }

    pub fn set_remote(&self, location_id: &str, backups: Vec<RemoteBackup>) {
        self.remote.lock().insert(location_id.to_string(), backups);
    }

    /// Every deletion suspends for `delay` before answering.
    pub fn delay_deletes(&self, delay: Duration) {
        *self.delete_delay.lock() = Some(delay);
    }

    /// Attempted deletions in call order, as (backup_id, location_id).
    pub fn deletes(&self) -> Vec<Pair> {
        self.deletes.lock().clone()
    }
}

#[async_trait]
impl BackupTool for ScriptedTool {
    async fn delete_backup(
        &self,
        location_id: &str,
        _location: &StorageLocation,
        _db_id: &str,
        backup_id: &str,
    ) -> Result<DeleteOutcome, ToolError> {
        let key = pair(backup_id, location_id);
        self.deletes.lock().push(key.clone());

        let delay = *self.delete_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.erroring_deletes.lock().contains(&key) {
            return Err(ToolError::Timeout {
                command: "scripted-delete".into(),
                after: Duration::from_secs(1),
            });
        }
        if self.failing_deletes.lock().contains(&key) {
            return Ok(DeleteOutcome::Failed {
                exit_code: Some(1),
                stderr: "scripted failure".into(),
            });
        }
        Ok(DeleteOutcome::Deleted)
    }

    async fn keep_status(
        &self,
        location_id: &str,
        _location: &StorageLocation,
        _db_id: &str,
        backup_id: &str,
    ) -> Result<KeepStatus, ToolError> {
        Ok(self
            .keep
            .lock()
            .get(&pair(backup_id, location_id))
            .copied()
            .unwrap_or_default())
    }

    async fn set_keep(
        &self,
        location_id: &str,
        _location: &StorageLocation,
        _db_id: &str,
        backup_id: &str,
        target: KeepTarget,
    ) -> Result<(), ToolError> {
        self.set_status(backup_id, location_id, target.into());
        Ok(())
    }

    async fn release_keep(
        &self,
        location_id: &str,
        _location: &StorageLocation,
        _db_id: &str,
        backup_id: &str,
    ) -> Result<(), ToolError> {
        self.set_status(backup_id, location_id, KeepStatus::NoKeep);
        Ok(())
    }

    async fn list_backups(
        &self,
        location_id: &str,
        _location: &StorageLocation,
        _db_id: &str,
    ) -> Result<Vec<RemoteBackup>, ToolError> {
        Ok(self
            .remote
            .lock()
            .get(location_id)
            .cloned()
            .unwrap_or_default())
    }
}
