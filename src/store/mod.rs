pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{BackupError, Result};

/// Which database engine a configuration backs up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Mongo,
    Postgres,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Mongo => "mongo",
            DatabaseKind::Postgres => "postgres",
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            DatabaseKind::Mongo => "mongodump",
            DatabaseKind::Postgres => "pg_dump",
        }
    }

    /// Parses the persisted type tag. Anything unknown is rejected so a bad
    /// row cannot silently select a dump strategy.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "mongo" => Ok(DatabaseKind::Mongo),
            "postgres" => Ok(DatabaseKind::Postgres),
            other => Err(BackupError::UnsupportedType(other.to_string())),
        }
    }
}

/// Human backup frequency, the coarse half of the schedule descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
}

impl Frequency {
    /// Unknown values map to `None`, not an error: a configuration with an
    /// unrecognized frequency simply has no derivable schedule.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hourly" => Some(Frequency::Hourly),
            "daily" => Some(Frequency::Daily),
            "weekly" => Some(Frequency::Weekly),
            _ => None,
        }
    }
}

/// Schedule descriptor. Deployments use either raw cron expressions or the
/// frequency/time/day triple; both resolve through one derivation seam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Schedule {
    /// A raw five-field cron expression stored verbatim.
    Cron(String),
    /// Frequency plus optional "HH:MM" time of day and day of week (0=Sunday).
    Plan {
        frequency: Option<Frequency>,
        time_of_day: Option<String>,
        day_of_week: Option<u8>,
    },
}

/// A persisted, user-owned backup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfiguration {
    pub id: String,
    pub owner_id: String,
    #[serde(rename = "type")]
    pub kind: DatabaseKind,
    pub mongo_uri: Option<String>,
    pub mongo_db_name: Option<String>,
    pub pg_uri: Option<String>,
    pub pg_db_name: Option<String>,
    pub schedule: Schedule,
    pub enabled: bool,
}

impl BackupConfiguration {
    /// Name of the database this configuration targets, per its kind.
    pub fn db_name(&self) -> Option<&str> {
        match self.kind {
            DatabaseKind::Mongo => self.mongo_db_name.as_deref(),
            DatabaseKind::Postgres => self.pg_db_name.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Pending,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }
}

/// One row per backup execution attempt. Created pending before the dump tool
/// runs; transitions to completed or failed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub owner_id: String,
    pub db_name: String,
    pub status: BackupStatus,
    pub artifact_path: Option<String>,
    pub size_bytes: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Read access to persisted backup configurations.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// All enabled configurations the scheduler should maintain timers for.
    async fn list_scheduled(&self) -> Result<Vec<BackupConfiguration>>;
}

/// Audit-row bookkeeping around each execution attempt.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_pending(&self, owner_id: &str, db_name: &str) -> Result<String>;

    async fn mark_completed(
        &self,
        record_id: &str,
        artifact_path: &str,
        size_bytes: u64,
        completed_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn mark_failed(&self, record_id: &str, error_message: &str) -> Result<()>;
}
