//! Retention worker driving the sweep.
//!
//! A sweep walks the configured databases one at a time and issues one
//! backup tool call at a time. Failures stay local: a failed deletion is
//! retried on the next sweep and a failing database does not stop the
//! others.

use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{Candidate, SweepError, select_candidates};
use crate::{
    archive::ArchiveService,
    config::{DatabaseConfig, StorageLocation, SweepConfig},
    db::BackupRepo,
    events::{EventBus, ServerEvent},
    observability::metrics,
    settings::{Settings, SettingsStore},
    tool::{BackupTool, DeleteOutcome},
};

/// Results from a single sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub dry_run: bool,
    /// Databases examined.
    pub databases: usize,
    /// Logical backups selected for deletion.
    pub candidates: usize,
    /// (backup, location) pairs removed from the catalog.
    pub deleted: usize,
    /// (backup, location) pairs the backup tool did not delete.
    pub failed_deletes: usize,
    /// Databases that could not be processed, with the reason.
    pub failed_databases: Vec<(String, String)>,
}

impl SweepReport {
    pub fn has_deletions(&self) -> bool {
        self.deleted > 0
    }

    pub fn has_failures(&self) -> bool {
        self.failed_deletes > 0 || !self.failed_databases.is_empty()
    }
}

/// Everything a sweep needs, shared by the background worker and the
/// one-shot `sweep` command.
pub struct RetentionSweep {
    backups: Arc<dyn BackupRepo>,
    settings: SettingsStore,
    archive: ArchiveService,
    tool: Arc<dyn BackupTool>,
    events: EventBus,
    config: SweepConfig,
    /// Held for the duration of a sweep; a second trigger waits.
    running: Mutex<()>,
}

impl RetentionSweep {
    pub fn new(
        backups: Arc<dyn BackupRepo>,
        settings: SettingsStore,
        archive: ArchiveService,
        tool: Arc<dyn BackupTool>,
        events: EventBus,
        config: SweepConfig,
    ) -> Self {
        Self {
            backups,
            settings,
            archive,
            tool,
            events,
            config,
            running: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Run one sweep with the configured dry-run setting.
    pub async fn run_sweep(&self) -> SweepReport {
        self.run_sweep_with(self.config.safety.dry_run).await
    }

    /// Run one sweep. `dry_run` computes and logs the deletion set without
    /// touching storage or the catalog.
    pub async fn run_sweep_with(&self, dry_run: bool) -> SweepReport {
        let _guard = self.running.lock().await;

        let settings = self.settings.snapshot();
        let now = self.archive.now();
        let mut report = SweepReport {
            dry_run,
            ..Default::default()
        };

        for (db_id, db) in &settings.databases {
            report.databases += 1;

            if let Err(e) = self
                .sweep_database(&settings, db_id, db, now, dry_run, &mut report)
                .await
            {
                tracing::error!(db = %db_id, error = %e, "Retention sweep failed for database");
                metrics::record_sweep_error(db_id);
                report.failed_databases.push((db_id.clone(), e.to_string()));
            }
        }

        self.events.publish(ServerEvent::SweepCompleted {
            timestamp: self.archive.now(),
            dry_run,
            databases: report.databases,
            candidates: report.candidates,
            deleted: report.deleted,
            failed_deletes: report.failed_deletes,
            failed_databases: report.failed_databases.len(),
        });

        report
    }

    async fn sweep_database(
        &self,
        settings: &Settings,
        db_id: &str,
        db: &DatabaseConfig,
        now: DateTime<Utc>,
        dry_run: bool,
        report: &mut SweepReport,
    ) -> Result<(), SweepError> {
        let no_keep = self.backups.list_no_keep(db_id).await?;

        let candidates = select_candidates(&no_keep, &db.retention_policy, now, |c| {
            let decision = self
                .archive
                .determine_action_at(settings, db_id, c.timestamp, now)?;
            Ok(decision.is_keep())
        })?;

        if candidates.is_empty() {
            tracing::debug!(db = %db_id, "No backups to delete");
            return Ok(());
        }
        report.candidates += candidates.len();

        // Rows under an operator keep at a location are left alone there.
        let kept: HashSet<(String, String)> = self
            .backups
            .list(db_id)
            .await?
            .into_iter()
            .filter(|b| b.archival_status.is_kept())
            .map(|b| (b.backup_id, b.location_id))
            .collect();

        let mut removed = 0u64;
        for candidate in &candidates {
            for (location_id, location) in settings.locations_for(db_id) {
                if kept.contains(&(candidate.backup_id.clone(), location_id.to_string())) {
                    tracing::debug!(
                        db = %db_id,
                        backup = %candidate.backup_id,
                        location = %location_id,
                        "Backup is kept at this location, skipping"
                    );
                    continue;
                }

                if dry_run {
                    tracing::info!(
                        db = %db_id,
                        backup = %candidate.backup_id,
                        location = %location_id,
                        timestamp = %candidate.timestamp,
                        "DRY RUN: Would delete backup"
                    );
                    continue;
                }

                let deleted = self
                    .delete_pair(db_id, candidate, location_id, location)
                    .await;
                if !deleted {
                    report.failed_deletes += 1;
                    metrics::record_sweep_delete_failure(db_id);
                    if self.config.safety.confirm_deletes {
                        continue;
                    }
                }

                if let Err(e) = self
                    .backups
                    .remove(db_id, &candidate.backup_id, location_id)
                    .await
                {
                    tracing::error!(
                        db = %db_id,
                        backup = %candidate.backup_id,
                        location = %location_id,
                        error = %e,
                        "Failed to remove backup from the catalog"
                    );
                    // A tool failure above was already counted
                    if deleted {
                        report.failed_deletes += 1;
                        metrics::record_sweep_delete_failure(db_id);
                    }
                    continue;
                }
                removed += 1;
                report.deleted += 1;

                self.events.publish(ServerEvent::BackupRemoved {
                    db_id: db_id.to_string(),
                    backup_id: candidate.backup_id.clone(),
                    location_id: location_id.to_string(),
                    timestamp: self.archive.now(),
                });
            }
        }

        if removed > 0 {
            tracing::info!(db = %db_id, removed, "Removed expired backups");
            metrics::record_sweep_deletion(db_id, removed);
        }

        Ok(())
    }

    /// Returns whether the tool confirmed the deletion.
    async fn delete_pair(
        &self,
        db_id: &str,
        candidate: &Candidate,
        location_id: &str,
        location: &StorageLocation,
    ) -> bool {
        match self
            .tool
            .delete_backup(location_id, location, db_id, &candidate.backup_id)
            .await
        {
            Ok(DeleteOutcome::Deleted) => {
                tracing::debug!(
                    db = %db_id,
                    backup = %candidate.backup_id,
                    location = %location_id,
                    "Deleted backup"
                );
                true
            }
            Ok(DeleteOutcome::Failed { exit_code, stderr }) => {
                tracing::warn!(
                    db = %db_id,
                    backup = %candidate.backup_id,
                    location = %location_id,
                    exit_code = ?exit_code,
                    stderr = %stderr,
                    "Backup tool failed to delete backup"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    db = %db_id,
                    backup = %candidate.backup_id,
                    location = %location_id,
                    error = %e,
                    "Error running backup tool"
                );
                false
            }
        }
    }
}

/// Starts the retention worker as a background task.
///
/// The worker sweeps at the configured interval until the task is dropped.
pub async fn start_retention_worker(sweep: Arc<RetentionSweep>) {
    let config = sweep.config().clone();

    if !config.enabled {
        tracing::info!("Retention worker disabled by configuration");
        return;
    }

    let dry_run_msg = if config.safety.dry_run {
        " (DRY RUN)"
    } else {
        ""
    };

    tracing::info!(
        interval_secs = config.interval_secs,
        dry_run = config.safety.dry_run,
        confirm_deletes = config.safety.confirm_deletes,
        "Starting retention worker{}",
        dry_run_msg
    );

    let interval = config.interval();

    loop {
        let report = sweep.run_sweep().await;

        if report.has_deletions() || report.has_failures() || report.candidates > 0 {
            tracing::info!(
                databases = report.databases,
                candidates = report.candidates,
                deleted = report.deleted,
                failed_deletes = report.failed_deletes,
                failed_databases = report.failed_databases.len(),
                dry_run = report.dry_run,
                "Retention sweep complete{}",
                dry_run_msg
            );
        } else {
            tracing::debug!("Retention sweep complete, no backups to delete");
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeDelta, TimeZone, Weekday};

    use super::*;
    use crate::{
        archive::ManualClock,
        config::SweepSafety,
        db::{DbError, DbPool, DbResult, tests::harness::create_sqlite_catalog},
        events::EventTopic,
        models::{
            ArchivalPolicy, ArchiveRetention, Backup, DurationUnit, KeepStatus, RetentionPolicy,
            RetentionStrategy, RetentionUnit,
        },
        tool::testing::ScriptedTool,
    };

    fn now() -> DateTime<Utc> {
        // A Saturday
        Utc.with_ymd_and_hms(2024, 3, 30, 12, 0, 0).unwrap()
    }

    fn location(bucket: &str) -> StorageLocation {
        StorageLocation {
            endpoint: "https://s3.example.com".into(),
            bucket: bucket.into(),
            prefix: None,
            friendly_name: None,
        }
    }

    fn settings(policy: RetentionPolicy, archival: Vec<ArchivalPolicy>) -> Settings {
        let mut locations = BTreeMap::new();
        locations.insert("s3-eu".to_string(), location("eu"));
        locations.insert("s3-us".to_string(), location("us"));

        let mut databases = BTreeMap::new();
        databases.insert(
            "orders".to_string(),
            DatabaseConfig {
                name: None,
                backup_locations: vec!["s3-eu".into(), "s3-us".into()],
                retention_policy: policy,
                archival_policies: archival,
            },
        );

        Settings {
            timezone: chrono_tz::Tz::UTC,
            locations,
            databases,
        }
    }

    fn sweep_config(dry_run: bool, confirm_deletes: bool) -> SweepConfig {
        SweepConfig {
            safety: SweepSafety {
                dry_run,
                confirm_deletes,
            },
            ..Default::default()
        }
    }

    struct Fixture {
        db: DbPool,
        tool: Arc<ScriptedTool>,
        events: EventBus,
        sweep: RetentionSweep,
    }

    async fn fixture(settings: Settings, config: SweepConfig) -> Fixture {
        let db = create_sqlite_catalog().await;
        let tool = Arc::new(ScriptedTool::new());
        let events = EventBus::new();
        let sweep = RetentionSweep::new(
            db.backups(),
            SettingsStore::new(settings),
            ArchiveService::new(Arc::new(ManualClock::new(now()))),
            tool.clone(),
            events.clone(),
            config,
        );
        Fixture {
            db,
            tool,
            events,
            sweep,
        }
    }

    async fn add_everywhere(db: &DbPool, id: &str, age_days: i64) {
        for location in ["s3-eu", "s3-us"] {
            db.backups()
                .add(
                    "orders",
                    &Backup::new(id, location, now() - TimeDelta::days(age_days)),
                )
                .await
                .unwrap();
        }
    }

    async fn remaining(db: &DbPool) -> Vec<String> {
        let mut ids: Vec<String> = db
            .backups()
            .list("orders")
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.backup_id)
            .collect();
        ids.dedup();
        ids
    }

    fn no_window(minimum_redundancy: u32) -> RetentionPolicy {
        RetentionPolicy {
            minimum_redundancy,
            retention: 0,
            retention_units: RetentionUnit::Day,
        }
    }

    #[tokio::test]
    async fn test_redundancy_floor_sweep() {
        let f = fixture(settings(no_window(2), vec![]), sweep_config(false, true)).await;
        for (id, age) in [("B5", 1), ("B4", 2), ("B3", 3), ("B2", 4), ("B1", 5)] {
            add_everywhere(&f.db, id, age).await;
        }

        let report = f.sweep.run_sweep().await;

        assert_eq!(report.candidates, 3);
        assert_eq!(report.deleted, 6);
        assert!(!report.has_failures());
        assert_eq!(remaining(&f.db).await, vec!["B5", "B4"]);
        assert_eq!(
            f.tool.deletes(),
            vec![
                ("B3".to_string(), "s3-eu".to_string()),
                ("B3".to_string(), "s3-us".to_string()),
                ("B2".to_string(), "s3-eu".to_string()),
                ("B2".to_string(), "s3-us".to_string()),
                ("B1".to_string(), "s3-eu".to_string()),
                ("B1".to_string(), "s3-us".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_time_window_sweep() {
        let policy = RetentionPolicy {
            minimum_redundancy: 0,
            retention: 7,
            retention_units: RetentionUnit::Day,
        };
        let f = fixture(settings(policy, vec![]), sweep_config(false, true)).await;
        for (id, age) in [("1d", 1), ("3d", 3), ("8d", 8), ("10d", 10)] {
            add_everywhere(&f.db, id, age).await;
        }

        f.sweep.run_sweep().await;

        assert_eq!(remaining(&f.db).await, vec!["1d", "3d"]);
    }

    #[tokio::test]
    async fn test_archived_backup_survives_sweep() {
        // Every Sunday, kept for a year. 2024-03-03 was a Sunday.
        let sundays = ArchivalPolicy::new(
            ArchiveRetention {
                duration: 1,
                units: DurationUnit::Year,
            },
            RetentionStrategy::DayOfWeek {
                day_of_week: Weekday::Sun,
            },
        );
        let policy = RetentionPolicy {
            minimum_redundancy: 1,
            retention: 1,
            retention_units: RetentionUnit::Week,
        };
        let f = fixture(settings(policy, vec![sundays]), sweep_config(false, true)).await;
        add_everywhere(&f.db, "latest", 1).await;
        add_everywhere(&f.db, "sunday", 27).await;
        add_everywhere(&f.db, "monday", 26).await;

        f.sweep.run_sweep().await;

        assert_eq!(remaining(&f.db).await, vec!["latest", "sunday"]);
    }

    #[tokio::test]
    async fn test_kept_rows_are_never_deleted() {
        let f = fixture(settings(no_window(0), vec![]), sweep_config(false, true)).await;
        add_everywhere(&f.db, "b1", 10).await;
        f.db.backups()
            .update_keep_status("orders", "b1", "s3-us", KeepStatus::Full)
            .await
            .unwrap();

        f.sweep.run_sweep().await;

        assert_eq!(
            f.tool.deletes(),
            vec![("b1".to_string(), "s3-eu".to_string())]
        );
        let rows = f.db.backups().list("orders").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].location_id, "s3-us");
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_catalog_row_when_confirming() {
        let f = fixture(settings(no_window(0), vec![]), sweep_config(false, true)).await;
        add_everywhere(&f.db, "b1", 10).await;
        add_everywhere(&f.db, "b2", 11).await;
        f.tool.fail_delete("b1", "s3-eu");
        f.tool.error_delete("b2", "s3-us");

        let report = f.sweep.run_sweep().await;

        assert_eq!(report.failed_deletes, 2);
        assert_eq!(report.deleted, 2);
        assert_eq!(f.tool.deletes().len(), 4);

        let rows: Vec<(String, String)> = f
            .db
            .backups()
            .list("orders")
            .await
            .unwrap()
            .into_iter()
            .map(|b| (b.backup_id, b.location_id))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("b1".to_string(), "s3-eu".to_string()),
                ("b2".to_string(), "s3-us".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_delete_removes_row_when_not_confirming() {
        let f = fixture(settings(no_window(0), vec![]), sweep_config(false, false)).await;
        add_everywhere(&f.db, "b1", 10).await;
        f.tool.fail_delete("b1", "s3-eu");

        let report = f.sweep.run_sweep().await;

        assert_eq!(report.failed_deletes, 1);
        assert_eq!(report.deleted, 2);
        assert!(remaining(&f.db).await.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let f = fixture(settings(no_window(0), vec![]), sweep_config(true, true)).await;
        add_everywhere(&f.db, "b1", 10).await;

        let report = f.sweep.run_sweep().await;

        assert!(report.dry_run);
        assert_eq!(report.candidates, 1);
        assert_eq!(report.deleted, 0);
        assert!(f.tool.deletes().is_empty());
        assert_eq!(remaining(&f.db).await, vec!["b1"]);
    }

    #[tokio::test]
    async fn test_events_published() {
        let f = fixture(settings(no_window(0), vec![]), sweep_config(false, true)).await;
        add_everywhere(&f.db, "b1", 10).await;
        let mut rx = f.events.subscribe();

        f.sweep.run_sweep().await;

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            ServerEvent::BackupRemoved {
                db_id: "orders".into(),
                backup_id: "b1".into(),
                location_id: "s3-eu".into(),
                timestamp: now(),
            }
        );
        let second = rx.recv().await.unwrap();
        assert_eq!(second.topic(), EventTopic::Backups);
        let last = rx.recv().await.unwrap();
        assert!(matches!(
            last,
            ServerEvent::SweepCompleted {
                deleted: 2,
                dry_run: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failing_database_does_not_stop_others() {
        let mut s = settings(no_window(0), vec![]);
        s.databases.insert(
            "billing".to_string(),
            DatabaseConfig {
                backup_locations: vec!["s3-eu".into()],
                retention_policy: RetentionPolicy {
                    minimum_redundancy: 0,
                    retention: u32::MAX,
                    retention_units: RetentionUnit::Month,
                },
                ..Default::default()
            },
        );
        let f = fixture(s, sweep_config(false, true)).await;
        add_everywhere(&f.db, "b1", 10).await;

        let report = f.sweep.run_sweep().await;

        assert_eq!(report.databases, 2);
        assert_eq!(report.failed_databases.len(), 1);
        assert_eq!(report.failed_databases[0].0, "billing");
        assert!(remaining(&f.db).await.is_empty());
    }

    /// Catalog whose `remove` fails for one (backup, location) pair.
    struct FlakyRemoveRepo {
        inner: Arc<dyn BackupRepo>,
        failing: (String, String),
    }

    #[async_trait::async_trait]
    impl BackupRepo for FlakyRemoveRepo {
        async fn add(&self, db_id: &str, backup: &Backup) -> DbResult<()> {
            self.inner.add(db_id, backup).await
        }

        async fn add_all(&self, db_id: &str, backups: &[Backup]) -> DbResult<u64> {
            self.inner.add_all(db_id, backups).await
        }

        async fn list(&self, db_id: &str) -> DbResult<Vec<Backup>> {
            self.inner.list(db_id).await
        }

        async fn list_no_keep(&self, db_id: &str) -> DbResult<Vec<Backup>> {
            self.inner.list_no_keep(db_id).await
        }

        async fn remove(&self, db_id: &str, backup_id: &str, location_id: &str) -> DbResult<bool> {
            if (backup_id, location_id) == (self.failing.0.as_str(), self.failing.1.as_str()) {
                return Err(DbError::Internal("disk I/O error".into()));
            }
            self.inner.remove(db_id, backup_id, location_id).await
        }

        async fn update_keep_status(
            &self,
            db_id: &str,
            backup_id: &str,
            location_id: &str,
            status: KeepStatus,
        ) -> DbResult<bool> {
            self.inner
                .update_keep_status(db_id, backup_id, location_id, status)
                .await
        }

        async fn clear(&self, db_id: &str) -> DbResult<u64> {
            self.inner.clear(db_id).await
        }

        async fn replace_all(&self, db_id: &str, backups: &[Backup]) -> DbResult<()> {
            self.inner.replace_all(db_id, backups).await
        }
    }

    #[tokio::test]
    async fn test_catalog_write_failure_does_not_stop_database() {
        let f = fixture(settings(no_window(0), vec![]), sweep_config(false, true)).await;
        add_everywhere(&f.db, "b2", 2).await;
        add_everywhere(&f.db, "b1", 3).await;

        let sweep = RetentionSweep::new(
            Arc::new(FlakyRemoveRepo {
                inner: f.db.backups(),
                failing: ("b2".into(), "s3-eu".into()),
            }),
            SettingsStore::new(settings(no_window(0), vec![])),
            ArchiveService::new(Arc::new(ManualClock::new(now()))),
            f.tool.clone(),
            f.events.clone(),
            sweep_config(false, true),
        );

        let report = sweep.run_sweep().await;

        assert!(report.failed_databases.is_empty());
        assert_eq!(report.failed_deletes, 1);
        assert_eq!(report.deleted, 3);
        assert_eq!(f.tool.deletes().len(), 4);

        let rows = f.db.backups().list("orders").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            (rows[0].backup_id.as_str(), rows[0].location_id.as_str()),
            ("b2", "s3-eu")
        );
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_run_one_at_a_time() {
        let f = fixture(settings(no_window(0), vec![]), sweep_config(false, true)).await;
        add_everywhere(&f.db, "b2", 2).await;
        add_everywhere(&f.db, "b1", 3).await;
        f.tool.delay_deletes(std::time::Duration::from_millis(20));

        let (first, second) = tokio::join!(f.sweep.run_sweep(), f.sweep.run_sweep());

        // The second sweep starts after the first finished and finds nothing
        assert_eq!(first.deleted + second.deleted, 4);
        assert_eq!(first.candidates + second.candidates, 2);
        assert!(first.candidates == 0 || second.candidates == 0);
        assert_eq!(
            f.tool.deletes(),
            vec![
                ("b2".to_string(), "s3-eu".to_string()),
                ("b2".to_string(), "s3-us".to_string()),
                ("b1".to_string(), "s3-eu".to_string()),
                ("b1".to_string(), "s3-us".to_string()),
            ]
        );
        assert!(remaining(&f.db).await.is_empty());
    }
}
