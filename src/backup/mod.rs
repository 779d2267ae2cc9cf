pub(crate) mod archive;
pub(crate) mod dump;
pub mod encrypt;
mod logic;

pub use logic::EncryptedArtifact;

use crate::config::AppConfig;
use crate::errors::Result;
use crate::store::{BackupConfiguration, DatabaseKind};

/// Public entry point for one backup execution.
///
/// Dispatches to the per-engine pipeline; the kind enum is the single place
/// a new database type plugs in. Unknown persisted type tags are already
/// rejected when rows are decoded (`DatabaseKind::parse`), surfacing
/// `UnsupportedType` before any pipeline work.
pub async fn run_backup(
    app_config: &AppConfig,
    config: &BackupConfiguration,
) -> Result<EncryptedArtifact> {
    match config.kind {
        DatabaseKind::Mongo => logic::backup_mongo(app_config, config).await,
        DatabaseKind::Postgres => logic::backup_postgres(app_config, config).await,
    }
}
