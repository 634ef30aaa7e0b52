use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    archive::{ArchiveError, ArchiveService},
    config::StorageLocation,
    db::{BackupRepo, DbError},
    events::{EventBus, ServerEvent},
    models::{Backup, BackupGroup, BackupView, KeepStatus, KeepTarget},
    settings::{Settings, SettingsStore},
    tool::{BackupTool, ToolError},
};

/// Errors that can occur during backup operations.
#[derive(Debug, Error)]
pub enum BackupServiceError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Unknown database '{0}'")]
    UnknownDatabase(String),

    #[error("Location '{location_id}' is not configured for database '{db_id}'")]
    UnknownLocation { db_id: String, location_id: String },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Backup tool error: {0}")]
    Tool(#[from] ToolError),
}

pub type BackupServiceResult<T> = Result<T, BackupServiceError>;

/// Service layer for the backup catalog and operator holds.
#[derive(Clone)]
pub struct BackupService {
    backups: Arc<dyn BackupRepo>,
    settings: SettingsStore,
    archive: ArchiveService,
    tool: Arc<dyn BackupTool>,
    events: EventBus,
}

impl BackupService {
    pub fn new(
        backups: Arc<dyn BackupRepo>,
        settings: SettingsStore,
        archive: ArchiveService,
        tool: Arc<dyn BackupTool>,
        events: EventBus,
    ) -> Self {
        Self {
            backups,
            settings,
            archive,
            tool,
            events,
        }
    }

    /// Catalog rows of a database, newest first, with their archival state
    /// evaluated against the current policies.
    pub async fn list_backups(&self, db_id: &str) -> BackupServiceResult<Vec<BackupView>> {
        let settings = self.known_database(db_id)?;
        let now = self.archive.now();

        self.backups
            .list(db_id)
            .await?
            .into_iter()
            .map(|backup| -> BackupServiceResult<BackupView> {
                let decision =
                    self.archive
                        .determine_action_at(&settings, db_id, backup.timestamp, now)?;
                Ok(BackupView {
                    archived: decision.is_keep(),
                    archived_until: decision.expires_at(),
                    backup,
                })
            })
            .collect()
    }

    /// Catalog rows grouped by backup id, newest first.
    pub async fn backup_groups(&self, db_id: &str) -> BackupServiceResult<Vec<BackupGroup>> {
        let settings = self.known_database(db_id)?;
        let now = self.archive.now();

        // Rows of one backup are adjacent in catalog order
        let mut groups: Vec<BackupGroup> = Vec::new();
        for backup in self.backups.list(db_id).await? {
            match groups
                .last_mut()
                .filter(|g| g.backup_id == backup.backup_id)
            {
                Some(group) => {
                    if group.name.is_none() {
                        group.name = backup.name.clone();
                    }
                    group.backups.push(backup);
                }
                None => {
                    let decision =
                        self.archive
                            .determine_action_at(&settings, db_id, backup.timestamp, now)?;
                    groups.push(BackupGroup {
                        backup_id: backup.backup_id.clone(),
                        name: backup.name.clone(),
                        timestamp: backup.timestamp,
                        archived_until: decision.expires_at(),
                        backups: vec![backup],
                    });
                }
            }
        }

        Ok(groups)
    }

    /// Record a freshly taken backup in every configured location.
    pub async fn record_backup(
        &self,
        db_id: &str,
        backup_id: &str,
        name: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> BackupServiceResult<BackupGroup> {
        let settings = self.known_database(db_id)?;

        let new_rows: Vec<Backup> = settings
            .locations_for(db_id)
            .into_iter()
            .map(|(location_id, _)| {
                let mut backup = Backup::new(backup_id, location_id, timestamp);
                backup.name = name.clone();
                backup
            })
            .collect();

        // Rows recorded by an earlier attempt are kept as they are
        let inserted = self.backups.add_all(db_id, &new_rows).await?;
        let rows: Vec<Backup> = self
            .backups
            .list(db_id)
            .await?
            .into_iter()
            .filter(|b| b.backup_id == backup_id)
            .collect();

        let decision = self.archive.determine_action(&settings, db_id, timestamp)?;
        let group = BackupGroup {
            backup_id: backup_id.to_string(),
            name,
            timestamp,
            archived_until: decision.expires_at(),
            backups: rows,
        };

        tracing::info!(
            db = %db_id,
            backup = %backup_id,
            locations = group.backups.len(),
            inserted,
            "Recorded backup"
        );
        self.events.publish(ServerEvent::BackupAdded {
            db_id: db_id.to_string(),
            group: group.clone(),
            timestamp: self.archive.now(),
        });

        Ok(group)
    }

    /// Place an operator hold on a backup in the given locations.
    /// Returns the status each location reports afterwards.
    pub async fn set_keep(
        &self,
        db_id: &str,
        backup_id: &str,
        location_ids: &[String],
        target: KeepTarget,
    ) -> BackupServiceResult<BTreeMap<String, KeepStatus>> {
        let settings = self.known_database(db_id)?;
        let locations = resolve_locations(&settings, db_id, location_ids)?;

        let mut statuses = BTreeMap::new();
        for (location_id, location) in locations {
            self.tool
                .set_keep(&location_id, &location, db_id, backup_id, target)
                .await?;
            let status = self
                .refresh_status(db_id, backup_id, &location_id, &location)
                .await?;
            statuses.insert(location_id, status);
        }

        self.publish_keep_change(db_id, backup_id, &statuses);
        Ok(statuses)
    }

    /// Release an operator hold in the given locations.
    pub async fn release_keep(
        &self,
        db_id: &str,
        backup_id: &str,
        location_ids: &[String],
    ) -> BackupServiceResult<BTreeMap<String, KeepStatus>> {
        let settings = self.known_database(db_id)?;
        let locations = resolve_locations(&settings, db_id, location_ids)?;

        let mut statuses = BTreeMap::new();
        for (location_id, location) in locations {
            self.tool
                .release_keep(&location_id, &location, db_id, backup_id)
                .await?;
            let status = self
                .refresh_status(db_id, backup_id, &location_id, &location)
                .await?;
            statuses.insert(location_id, status);
        }

        self.publish_keep_change(db_id, backup_id, &statuses);
        Ok(statuses)
    }

    /// Rebuild a database's catalog from what the backup tool lists in each
    /// configured location. Returns the number of rows written.
    ///
    /// Nothing is replaced unless every location could be read.
    pub async fn sync_catalog(&self, db_id: &str) -> BackupServiceResult<usize> {
        let settings = self.known_database(db_id)?;

        let mut rows = Vec::new();
        for (location_id, location) in settings.locations_for(db_id) {
            let remote = self.tool.list_backups(location_id, location, db_id).await?;
            tracing::debug!(db = %db_id, location = %location_id, count = remote.len(), "Listed remote backups");

            for entry in remote {
                let status = self
                    .tool
                    .keep_status(location_id, location, db_id, &entry.backup_id)
                    .await?;
                let mut backup = Backup::new(entry.backup_id, location_id, entry.begin_time)
                    .with_status(status);
                backup.name = entry.name;
                rows.push(backup);
            }
        }

        self.backups.replace_all(db_id, &rows).await?;
        tracing::info!(db = %db_id, rows = rows.len(), "Synchronized backup catalog");
        Ok(rows.len())
    }

    /// Forget every catalog row of a database. Physical backups are not
    /// touched; `sync_catalog` rebuilds the rows from storage.
    pub async fn clear_catalog(&self, db_id: &str) -> BackupServiceResult<u64> {
        self.known_database(db_id)?;
        let removed = self.backups.clear(db_id).await?;
        tracing::info!(db = %db_id, removed, "Cleared backup catalog");
        Ok(removed)
    }

    fn known_database(&self, db_id: &str) -> BackupServiceResult<Arc<Settings>> {
        let settings = self.settings.snapshot();
        if settings.database(db_id).is_none() {
            return Err(BackupServiceError::UnknownDatabase(db_id.to_string()));
        }
        Ok(settings)
    }

    async fn refresh_status(
        &self,
        db_id: &str,
        backup_id: &str,
        location_id: &str,
        location: &StorageLocation,
    ) -> BackupServiceResult<KeepStatus> {
        let status = self
            .tool
            .keep_status(location_id, location, db_id, backup_id)
            .await?;
        let updated = self
            .backups
            .update_keep_status(db_id, backup_id, location_id, status)
            .await?;
        if !updated {
            tracing::warn!(
                db = %db_id,
                backup = %backup_id,
                location = %location_id,
                "Keep status changed for a backup missing from the catalog"
            );
        }
        Ok(status)
    }

    fn publish_keep_change(
        &self,
        db_id: &str,
        backup_id: &str,
        statuses: &BTreeMap<String, KeepStatus>,
    ) {
        if statuses.is_empty() {
            return;
        }
        self.events.publish(ServerEvent::KeepStatusChanged {
            db_id: db_id.to_string(),
            backup_id: backup_id.to_string(),
            statuses: statuses.clone(),
            timestamp: self.archive.now(),
        });
    }
}

/// Looks up every requested location, failing before any tool call if one
/// is not configured for the database.
fn resolve_locations(
    settings: &Settings,
    db_id: &str,
    location_ids: &[String],
) -> BackupServiceResult<Vec<(String, StorageLocation)>> {
    let configured = settings.locations_for(db_id);
    location_ids
        .iter()
        .map(|requested| {
            configured
                .iter()
                .find(|(id, _)| *id == requested.as_str())
                .map(|(id, location)| (id.to_string(), (*location).clone()))
                .ok_or_else(|| BackupServiceError::UnknownLocation {
                    db_id: db_id.to_string(),
                    location_id: requested.clone(),
                })
        })
        .collect()
}
