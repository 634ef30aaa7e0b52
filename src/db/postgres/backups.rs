use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{BackupRepo, backup_from_columns},
    },
    models::{Backup, KeepStatus},
};

pub struct PostgresBackupRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresBackupRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn row_to_backup(row: &sqlx::postgres::PgRow) -> DbResult<Backup> {
        let status: String = row.get("archival_status");
        backup_from_columns(
            row.get("backup_id"),
            row.get("location_id"),
            &status,
            row.get("label"),
            row.get("timestamp_ms"),
        )
    }

    async fn fetch(&self, db_id: &str) -> DbResult<Vec<Backup>> {
        let rows = sqlx::query(
            r#"
            SELECT backup_id, location_id, archival_status, label, timestamp_ms
            FROM backups
            WHERE db_id = $1
            ORDER BY timestamp_ms DESC, backup_id DESC, location_id ASC
            "#,
        )
        .bind(db_id)
        .fetch_all(&self.read_pool)
        .await?;

        rows.iter().map(Self::row_to_backup).collect()
    }
}

#[async_trait]
impl BackupRepo for PostgresBackupRepo {
    async fn add(&self, db_id: &str, backup: &Backup) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO backups (db_id, backup_id, location_id, archival_status, label, timestamp_ms)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(db_id)
        .bind(&backup.backup_id)
        .bind(&backup.location_id)
        .bind(backup.archival_status.as_str())
        .bind(&backup.name)
        .bind(backup.timestamp.timestamp_millis())
        .execute(&self.write_pool)
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
        let mut tx = self.write_pool.begin().await?;
        let mut inserted = 0;

        for backup in backups {
            let result = sqlx::query(
                r#"
                INSERT INTO backups (db_id, backup_id, location_id, archival_status, label, timestamp_ms)
                VALUES ($1, $2, $3, $4, $5, $6)
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
        self.fetch(db_id).await
    }

    async fn list_no_keep(&self, db_id: &str) -> DbResult<Vec<Backup>> {
        Ok(self
            .fetch(db_id)
            .await?
            .into_iter()
            .filter(|b| !b.archival_status.is_kept())
            .collect())
    }

    async fn remove(&self, db_id: &str, backup_id: &str, location_id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "DELETE FROM backups WHERE db_id = $1 AND backup_id = $2 AND location_id = $3",
        )
        .bind(db_id)
        .bind(backup_id)
        .bind(location_id)
        .execute(&self.write_pool)
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
            UPDATE backups SET archival_status = $1
            WHERE db_id = $2 AND backup_id = $3 AND location_id = $4
            "#,
        )
        .bind(status.as_str())
        .bind(db_id)
        .bind(backup_id)
        .bind(location_id)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, db_id: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM backups WHERE db_id = $1")
            .bind(db_id)
            .execute(&self.write_pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn replace_all(&self, db_id: &str, backups: &[Backup]) -> DbResult<()> {
        let mut tx = self.write_pool.begin().await?;

        sqlx::query("DELETE FROM backups WHERE db_id = $1")
            .bind(db_id)
            .execute(&mut *tx)
            .await?;

        for backup in backups {
            sqlx::query(
                r#"
                INSERT INTO backups (db_id, backup_id, location_id, archival_status, label, timestamp_ms)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (db_id, backup_id, location_id) DO UPDATE SET
                    archival_status = EXCLUDED.archival_status,
                    label = EXCLUDED.label,
                    timestamp_ms = EXCLUDED.timestamp_ms
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
