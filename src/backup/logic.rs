//! Backup pipeline orchestration.
//!
//! One linear pass per execution: dump, archive (mongo only), encrypt, then
//! cleanup of every unencrypted intermediate. Cleanup runs on success and
//! failure alike so a failed run never strands plaintext on disk.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tracing::{info, warn};

use crate::backup::{archive, dump, encrypt};
use crate::config::AppConfig;
use crate::errors::{BackupError, Result};
use crate::store::{BackupConfiguration, DatabaseKind};

/// Pointer to the final at-rest artifact of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedArtifact {
    pub kind: DatabaseKind,
    pub path: PathBuf,
}

/// Working directory for one execution:
/// `{backup_root}/{owner_id}/{kind}/{db_name}/{timestamp}`.
/// The millisecond timestamp keeps concurrent runs for different
/// configurations from colliding on disk.
fn work_dir(app_config: &AppConfig, config: &BackupConfiguration, db_name: &str) -> PathBuf {
    app_config
        .backup_root
        .join(&config.owner_id)
        .join(config.kind.as_str())
        .join(db_name)
        .join(Utc::now().timestamp_millis().to_string())
}

pub async fn backup_mongo(
    app_config: &AppConfig,
    config: &BackupConfiguration,
) -> Result<EncryptedArtifact> {
    let (uri, db_name) = match (&config.mongo_uri, &config.mongo_db_name) {
        (Some(uri), Some(db)) if !uri.is_empty() && !db.is_empty() => (uri, db),
        _ => {
            return Err(BackupError::ConfigMissing(
                "mongo URI and database name are required".to_string(),
            ));
        }
    };

    let dump_dir = work_dir(app_config, config, db_name);
    let tar_path = dump_dir.with_extension("tar.gz");

    let result = async {
        dump::dump(app_config, DatabaseKind::Mongo, uri, db_name, &dump_dir).await?;
        archive::create_tar_gz_archive(&dump_dir, &tar_path)?;
        let encrypted = encrypt::encrypt_file(app_config, &tar_path).await?;
        Ok(EncryptedArtifact {
            kind: DatabaseKind::Mongo,
            path: encrypted,
        })
    }
    .await;

    cleanup_dir(&dump_dir).await;
    cleanup_file(&tar_path).await;
    if result.is_err() {
        cleanup_file(&encrypt::encrypted_path(&tar_path)).await;
    }

    if let Ok(artifact) = &result {
        info!(artifact = %artifact.path.display(), "mongo backup completed");
    }
    result
}

pub async fn backup_postgres(
    app_config: &AppConfig,
    config: &BackupConfiguration,
) -> Result<EncryptedArtifact> {
    let (uri, db_name) = match (&config.pg_uri, &config.pg_db_name) {
        (Some(uri), Some(db)) if !uri.is_empty() && !db.is_empty() => (uri, db),
        _ => {
            return Err(BackupError::ConfigMissing(
                "postgres URI and database name are required".to_string(),
            ));
        }
    };

    let base_dir = work_dir(app_config, config, db_name);
    let sql_path = base_dir.join(format!("{db_name}.sql"));

    let result = async {
        dump::dump(app_config, DatabaseKind::Postgres, uri, db_name, &sql_path).await?;
        let encrypted = encrypt::encrypt_file(app_config, &sql_path).await?;
        Ok(EncryptedArtifact {
            kind: DatabaseKind::Postgres,
            path: encrypted,
        })
    }
    .await;

    cleanup_file(&sql_path).await;
    if result.is_err() {
        cleanup_file(&encrypt::encrypted_path(&sql_path)).await;
        cleanup_dir_if_empty(&base_dir).await;
    }

    if let Ok(artifact) = &result {
        info!(artifact = %artifact.path.display(), "postgres backup completed");
    }
    result
}

async fn cleanup_dir(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove working directory");
        }
    }
}

async fn cleanup_file(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove intermediate file");
        }
    }
}

async fn cleanup_dir_if_empty(path: &Path) {
    // remove_dir refuses non-empty directories, which is what we want here.
    let _ = fs::remove_dir(path).await;
}
