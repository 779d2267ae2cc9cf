use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use which::which;

use crate::errors::{BackupError, Result};
use crate::store::DatabaseKind;

const DEFAULT_BACKUP_ROOT: &str = "./backups";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;

/// Process-wide configuration, loaded once from the environment at startup.
///
/// Optional values (dump tool paths, encryption secret) are validated lazily
/// at first use so that a missing tool fails the operation that needs it
/// rather than the whole process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root directory under which per-owner backup trees are created.
    pub backup_root: PathBuf,
    /// Path to the `mongodump` binary, if resolvable.
    pub mongodump_path: Option<PathBuf>,
    /// Path to the `pg_dump` binary, if resolvable.
    pub pg_dump_path: Option<PathBuf>,
    /// Operator-supplied secret used to derive the artifact encryption key.
    pub encryption_secret: Option<String>,
    /// Connection string for the metadata database (configs + records).
    pub database_url: Option<String>,
    /// Interval between scheduler reconciliation passes.
    pub sync_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let backup_root = env::var("BACKUP_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_BACKUP_ROOT));

        let sync_interval = env::var("SCHEDULER_SYNC_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS));

        AppConfig {
            backup_root,
            mongodump_path: resolve_tool("MONGODUMP_PATH", "mongodump"),
            pg_dump_path: resolve_tool("PG_DUMP_PATH", "pg_dump"),
            encryption_secret: env::var("BACKUP_ENCRYPTION_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            sync_interval,
        }
    }

    /// Returns the dump binary for the given database kind, or
    /// `ToolNotConfigured` if neither the env var nor PATH yielded one.
    pub fn dump_tool(&self, kind: DatabaseKind) -> Result<&Path> {
        let (path, var) = match kind {
            DatabaseKind::Mongo => (&self.mongodump_path, "MONGODUMP_PATH"),
            DatabaseKind::Postgres => (&self.pg_dump_path, "PG_DUMP_PATH"),
        };
        path.as_deref().ok_or_else(|| {
            BackupError::ToolNotConfigured(format!(
                "{} is not set and the {} binary was not found in PATH",
                var,
                kind.tool_name()
            ))
        })
    }

    pub fn encryption_secret(&self) -> Result<&str> {
        self.encryption_secret
            .as_deref()
            .ok_or(BackupError::EncryptionSecretMissing)
    }
}

/// Explicit env var wins; otherwise fall back to a PATH lookup.
fn resolve_tool(env_var: &str, binary: &str) -> Option<PathBuf> {
    if let Ok(p) = env::var(env_var) {
        if !p.is_empty() {
            return Some(PathBuf::from(p));
        }
    }
    which(binary).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_config() -> AppConfig {
        AppConfig {
            backup_root: PathBuf::from(DEFAULT_BACKUP_ROOT),
            mongodump_path: None,
            pg_dump_path: None,
            encryption_secret: None,
            database_url: None,
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
        }
    }

    #[test]
    fn missing_tool_is_tool_not_configured() {
        let config = bare_config();
        let err = config.dump_tool(DatabaseKind::Mongo).unwrap_err();
        assert!(matches!(err, BackupError::ToolNotConfigured(_)));
    }

    #[test]
    fn missing_secret_is_secret_missing() {
        let config = bare_config();
        let err = config.encryption_secret().unwrap_err();
        assert!(matches!(err, BackupError::EncryptionSecretMissing));
    }

    #[test]
    fn configured_tool_is_returned() {
        let mut config = bare_config();
        config.pg_dump_path = Some(PathBuf::from("/usr/bin/pg_dump"));
        assert_eq!(
            config.dump_tool(DatabaseKind::Postgres).unwrap(),
            Path::new("/usr/bin/pg_dump")
        );
    }
}
