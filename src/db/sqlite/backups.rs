use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{BackupRepo, backup_from_columns},
    },
    models::{Backup, KeepStatus},
};

pub struct SqliteBackupRepo {
    pool: SqlitePool,
}

impl SqliteBackupRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_backup(row: &sqlx::sqlite::SqliteRow) -> DbResult<Backup> {
        let status: String = row.get("archival_status");
        backup_from_columns(
            row.get("backup_id"),
            row.get("location_id"),
            &status,
            row.get("label"),
            row.get("timestamp_ms"),
        )
    }
}

#[async_trait]
impl BackupRepo for SqliteBackupRepo {
    async fn add(&self, db_id: &str, backup: &Backup) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO backups (db_id, backup_id, location_id, archival_status, label, timestamp_ms)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(db_id)
        .bind(&backup.backup_id)
        .bind(&backup.location_id)
        .bind(backup.archival_status.as_str())
        .bind(&backup.name)
        .bind(backup.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::Conflict(format!(
                    "Backup '{}' is already recorded for location '{}'",
                    backup.backup_id, backup.location_id
                ))
            }
            _ => DbError::from(e),
        })?;

        Ok(())
    }

    async fn add_all(&self, db_id: &str, backups: &[Backup]) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for backup in backups {
            let result = sqlx::query(
                r#"
                INSERT INTO backups (db_id, backup_id, location_id, archival_status, label, timestamp_ms)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (db_id, backup_id, location_id) DO NOTHING
                "#,
            )
            .bind(db_id)
            .bind(&backup.backup_id)
            .bind(&backup.location_id)
            .bind(backup.archival_status.as_str())
            .bind(&backup.name)
            .bind(backup.timestamp.timestamp_millis())
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn list(&self, db_id: &str) -> DbResult<Vec<Backup>> {
        let rows = sqlx::query(
            r#"
            SELECT backup_id, location_id, archival_status, label, timestamp_ms
            FROM backups
            WHERE db_id = ?
            ORDER BY timestamp_ms DESC, backup_id DESC, location_id ASC
            "#,
        )
        .bind(db_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_backup).collect()
    }

    async fn list_no_keep(&self, db_id: &str) -> DbResult<Vec<Backup>> {
        // Filtered after parsing so unrecognised stored statuses count as nokeep
        Ok(self
            .list(db_id)
            .await?
            .into_iter()
            .filter(|b| !b.archival_status.is_kept())
            .collect())
    }

    async fn remove(&self, db_id: &str, backup_id: &str, location_id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "DELETE FROM backups WHERE db_id = ? AND backup_id = ? AND location_id = ?",
        )
        .bind(db_id)
        .bind(backup_id)
        .bind(location_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_keep_status(
        &self,
        db_id: &str,
        backup_id: &str,
        location_id: &str,
        status: KeepStatus,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE backups SET archival_status = ?
            WHERE db_id = ? AND backup_id = ? AND location_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(db_id)
        .bind(backup_id)
        .bind(location_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, db_id: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM backups WHERE db_id = ?")
            .bind(db_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn replace_all(&self, db_id: &str, backups: &[Backup]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM backups WHERE db_id = ?")
            .bind(db_id)
            .execute(&mut *tx)
            .await?;

        for backup in backups {
            sqlx::query(
                r#"
                INSERT INTO backups (db_id, backup_id, location_id, archival_status, label, timestamp_ms)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (db_id, backup_id, location_id) DO UPDATE SET
                    archival_status = excluded.archival_status,
                    label = excluded.label,
                    timestamp_ms = excluded.timestamp_ms
                "#,
            )
            .bind(db_id)
            .bind(&backup.backup_id)
            .bind(&backup.location_id)
            .bind(backup.archival_status.as_str())
            .bind(&backup.name)
            .bind(backup.timestamp.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
