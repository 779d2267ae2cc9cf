//! In-memory store backend.
//!
//! Backs scheduler and pipeline tests, and small single-node deployments
//! that do not want a metadata database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::errors::{BackupError, Result};
use crate::store::{
    BackupConfiguration, BackupRecord, BackupStatus, ConfigStore, RecordStore,
};

#[derive(Default)]
pub struct MemoryStore {
    configs: Mutex<HashMap<String, BackupConfiguration>>,
    records: Mutex<HashMap<String, BackupRecord>>,
    next_record_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert_config(&self, config: BackupConfiguration) {
        self.configs.lock().await.insert(config.id.clone(), config);
    }

    pub async fn remove_config(&self, id: &str) {
        self.configs.lock().await.remove(id);
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) {
        if let Some(config) = self.configs.lock().await.get_mut(id) {
            config.enabled = enabled;
        }
    }

    pub async fn record(&self, record_id: &str) -> Option<BackupRecord> {
        self.records.lock().await.get(record_id).cloned()
    }

    pub async fn record_count(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn list_scheduled(&self) -> Result<Vec<BackupConfiguration>> {
        let configs = self.configs.lock().await;
        Ok(configs.values().filter(|c| c.enabled).cloned().collect())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_pending(&self, owner_id: &str, db_name: &str) -> Result<String> {
        let id = format!("record-{}", self.next_record_id.fetch_add(1, Ordering::SeqCst));
        let record = BackupRecord {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            db_name: db_name.to_string(),
            status: BackupStatus::Pending,
            artifact_path: None,
            size_bytes: 0,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.records.lock().await.insert(id.clone(), record);
        Ok(id)
    }

    async fn mark_completed(
        &self,
        record_id: &str,
        artifact_path: &str,
        size_bytes: u64,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(record_id)
            .ok_or_else(|| BackupError::Store(format!("unknown record {record_id}")))?;
        record.status = BackupStatus::Completed;
        record.artifact_path = Some(artifact_path.to_string());
        record.size_bytes = size_bytes as i64;
        record.completed_at = Some(completed_at);
        Ok(())
    }

    async fn mark_failed(&self, record_id: &str, error_message: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(record_id)
            .ok_or_else(|| BackupError::Store(format!("unknown record {record_id}")))?;
        record.status = BackupStatus::Failed;
        record.error_message = Some(error_message.to_string());
        record.completed_at = Some(Utc::now());
        Ok(())
    }
}
