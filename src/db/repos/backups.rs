use async_trait::async_trait;
use chrono::DateTime;

use crate::{
    db::error::{DbError, DbResult},
    models::{Backup, KeepStatus},
};

/// Catalog of backups per managed database.
///
/// Every listing is ordered newest first (`timestamp` descending, ties broken
/// by backup id then location id), which the retention sweep relies on.
#[async_trait]
pub trait BackupRepo: Send + Sync {
    /// Record a backup in one location. Fails with `Conflict` if the
    /// (database, backup, location) row already exists.
    async fn add(&self, db_id: &str, backup: &Backup) -> DbResult<()>;

    /// Record a backup in several locations in one transaction. Rows that
    /// already exist are left as they are. Returns the number of rows
    /// inserted.
    async fn add_all(&self, db_id: &str, backups: &[Backup]) -> DbResult<u64>;

    /// All rows of a database.
    async fn list(&self, db_id: &str) -> DbResult<Vec<Backup>>;

    /// Rows without an operator keep.
    async fn list_no_keep(&self, db_id: &str) -> DbResult<Vec<Backup>>;

    /// Remove one (backup, location) row. Returns whether a row existed.
    async fn remove(&self, db_id: &str, backup_id: &str, location_id: &str) -> DbResult<bool>;

    /// Returns whether a row was updated.
    async fn update_keep_status(
        &self,
        db_id: &str,
        backup_id: &str,
        location_id: &str,
        status: KeepStatus,
    ) -> DbResult<bool>;

    /// Delete every row of a database. Returns the number of rows removed.
    async fn clear(&self, db_id: &str) -> DbResult<u64>;

    /// Atomically replace every row of a database.
    async fn replace_all(&self, db_id: &str, backups: &[Backup]) -> DbResult<()>;
}

/// Build a [`Backup`] from stored column values.
///
/// Unknown status strings read back as `nokeep`.
pub(crate) fn backup_from_columns(
    backup_id: String,
    location_id: String,
    archival_status: &str,
    label: Option<String>,
    timestamp_ms: i64,
) -> DbResult<Backup> {
    let timestamp = DateTime::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
        DbError::Internal(format!(
            "Invalid timestamp {timestamp_ms} for backup {backup_id}"
        ))
    })?;

    Ok(Backup {
        backup_id,
        location_id,
        timestamp,
        archival_status: KeepStatus::parse_lenient(archival_status),
        name: label,
    })
}
