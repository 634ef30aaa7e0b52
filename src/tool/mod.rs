//! Physical backup storage, driven through an external backup tool.
//!
//! The catalog only mirrors what the tool reports; every deletion and every
//! operator hold goes through [`BackupTool`].

mod barman;
mod error;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

pub use barman::BarmanCloudTool;
pub use error::ToolError;

use crate::{
    config::StorageLocation,
    models::{KeepStatus, KeepTarget},
};

/// Result of asking the tool to delete one backup from one location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
}

/// A backup as listed by the tool for one location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBackup {
    pub backup_id: String,
    pub name: Option<String>,
    pub begin_time: DateTime<Utc>,
}

/// Storage operations on one (location, database) pair.
///
/// `location_id` is the configured key of `location`; the tool uses it as
/// its credentials profile.
#[async_trait]
pub trait BackupTool: Send + Sync {
    /// Delete a backup. A tool that runs but reports failure yields
    /// `Ok(DeleteOutcome::Failed)`; errors are reserved for the tool not
    /// running to completion.
    async fn delete_backup(
        &self,
        location_id: &str,
        location: &StorageLocation,
        db_id: &str,
        backup_id: &str,
    ) -> Result<DeleteOutcome, ToolError>;

    async fn keep_status(
        &self,
        location_id: &str,
        location: &StorageLocation,
        db_id: &str,
        backup_id: &str,
    ) -> Result<KeepStatus, ToolError>;

    /// Place an operator hold on a backup.
    async fn set_keep(
        &self,
        location_id: &str,
        location: &StorageLocation,
        db_id: &str,
        backup_id: &str,
        target: KeepTarget,
    ) -> Result<(), ToolError>;

    /// Release an operator hold.
    async fn release_keep(
        &self,
        location_id: &str,
        location: &StorageLocation,
        db_id: &str,
        backup_id: &str,
    ) -> Result<(), ToolError>;

    async fn list_backups(
        &self,
        location_id: &str,
        location: &StorageLocation,
        db_id: &str,
    ) -> Result<Vec<RemoteBackup>, ToolError>;
}

/// Parse `Keep: <status>` output. Anything unrecognised is `nokeep`.
pub fn parse_keep_output(stdout: &str) -> KeepStatus {
    let line = stdout.trim();
    let value = line.strip_prefix("Keep:").unwrap_or(line);
    KeepStatus::parse_lenient(value)
}

#[derive(Deserialize)]
struct BackupListOutput {
    #[serde(default)]
    backups_list: Vec<BackupListEntry>,
}

#[derive(Deserialize)]
struct BackupListEntry {
    backup_id: String,
    #[serde(default)]
    backup_name: Option<String>,
    begin_time_iso: String,
}

/// Parse the JSON listing of `barman-cloud-backup-list --format json`.
/// Empty output means no backups.
pub fn parse_backup_list(command: &str, stdout: &str) -> Result<Vec<RemoteBackup>, ToolError> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }

    let parse_error = |message: String| ToolError::Parse {
        command: command.to_string(),
        message,
    };

    let output: BackupListOutput =
        serde_json::from_str(stdout).map_err(|e| parse_error(e.to_string()))?;

    output
        .backups_list
        .into_iter()
        .map(|entry| {
            let begin_time = DateTime::parse_from_rfc3339(&entry.begin_time_iso)
                .map_err(|e| {
                    parse_error(format!(
                        "backup {} has invalid begin_time_iso '{}': {e}",
                        entry.backup_id, entry.begin_time_iso
                    ))
                })?
                .with_timezone(&Utc);

            Ok(RemoteBackup {
                backup_id: entry.backup_id,
                name: entry.backup_name.filter(|n| !n.trim().is_empty()),
                begin_time,
            })
        })
        .collect()
}
