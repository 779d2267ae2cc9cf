//! sqlx-backed store implementation.
//!
//! Schema ownership (migrations) lives with the web application; this module
//! only reads `backup_configs` and writes `backup_records`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::errors::Result;
use crate::store::{
    BackupConfiguration, ConfigStore, DatabaseKind, Frequency, RecordStore, Schedule,
};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn config_from_row(row: &PgRow) -> Result<BackupConfiguration> {
    let kind = DatabaseKind::parse(row.try_get::<String, _>("db_type")?.as_str())?;

    // A non-null raw cron expression takes precedence over the
    // frequency/time/day triple.
    let schedule = match row.try_get::<Option<String>, _>("schedule")? {
        Some(expr) if !expr.trim().is_empty() => Schedule::Cron(expr),
        _ => Schedule::Plan {
            frequency: row
                .try_get::<Option<String>, _>("frequency")?
                .as_deref()
                .and_then(Frequency::parse),
            time_of_day: row.try_get::<Option<String>, _>("time_of_day")?,
            day_of_week: row
                .try_get::<Option<i16>, _>("day_of_week")?
                .and_then(|d| u8::try_from(d).ok()),
        },
    };

    Ok(BackupConfiguration {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        kind,
        mongo_uri: row.try_get("mongo_uri")?,
        mongo_db_name: row.try_get("mongo_db_name")?,
        pg_uri: row.try_get("pg_uri")?,
        pg_db_name: row.try_get("pg_db_name")?,
        schedule,
        enabled: row.try_get("enabled")?,
    })
}

#[async_trait]
impl ConfigStore for PgStore {
    async fn list_scheduled(&self) -> Result<Vec<BackupConfiguration>> {
        let rows = sqlx::query(
            "SELECT id, owner_id, db_type, mongo_uri, mongo_db_name, pg_uri, pg_db_name,
                    schedule, frequency, time_of_day, day_of_week, enabled
             FROM backup_configs
             WHERE enabled = true",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(config_from_row).collect()
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn create_pending(&self, owner_id: &str, db_name: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO backup_records (id, owner_id, db_name, status, size_bytes, created_at)
             VALUES ($1, $2, $3, 'pending', 0, $4)",
        )
        .bind(&id)
        .bind(owner_id)
        .bind(db_name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn mark_completed(
        &self,
        record_id: &str,
        artifact_path: &str,
        size_bytes: u64,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE backup_records
             SET status = 'completed', artifact_path = $2, size_bytes = $3, completed_at = $4
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(record_id)
        .bind(artifact_path)
        .bind(size_bytes as i64)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, record_id: &str, error_message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE backup_records
             SET status = 'failed', error_message = $2, completed_at = $3
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(record_id)
        .bind(error_message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
