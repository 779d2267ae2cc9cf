//! External dump tool invocation.
//!
//! The tools are always spawned with argv-style arguments; user-controlled
//! URIs and database names never pass through a shell.

use std::path::Path;

use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::errors::{BackupError, Result};
use crate::store::DatabaseKind;

/// Runs the database-specific dump tool against `uri`/`db_name`.
///
/// For mongo, `output_path` is the dump directory (created if absent) that
/// `mongodump` fills with a tree. For postgres, it is the `.sql` file
/// `pg_dump` writes; its parent directory is created if absent.
pub async fn dump(
    app_config: &AppConfig,
    kind: DatabaseKind,
    uri: &str,
    db_name: &str,
    output_path: &Path,
) -> Result<()> {
    if uri.trim().is_empty() || db_name.trim().is_empty() {
        return Err(BackupError::ConfigMissing(format!(
            "{} connection URI and database name are required",
            kind.as_str()
        )));
    }
    // Reject malformed URIs before spawning anything.
    url::Url::parse(uri)?;

    let tool = app_config.dump_tool(kind)?;

    let mut command = Command::new(tool);
    match kind {
        DatabaseKind::Mongo => {
            fs::create_dir_all(output_path).await?;
            command
                .arg(format!("--uri={uri}"))
                .arg(format!("--db={db_name}"))
                .arg("--out")
                .arg(output_path);
        }
        DatabaseKind::Postgres => {
            if let Some(parent) = output_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            command
                .arg("--dbname")
                .arg(uri)
                .arg("--file")
                .arg(output_path);
        }
    }

    debug!(tool = %tool.display(), db = db_name, "invoking dump tool");
    let output = command.output().await.map_err(|e| {
        BackupError::ToolNotConfigured(format!(
            "failed to spawn {}: {e}",
            tool.display()
        ))
    })?;

    if !output.status.success() {
        return Err(BackupError::DumpFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    info!(db = db_name, output = %output_path.display(), "dump completed");
    Ok(())
}

#[cfg(test)]
pub(crate) fn write_fake_tool(dir: &Path, name: &str, script: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
