use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Builder;
use tracing::info;
use walkdir::WalkDir;

use crate::errors::{BackupError, Result};

/// Packs a dump directory into a `.tar.gz` archive.
///
/// Paths inside the archive are relative to `source_dir`, so extraction
/// reproduces the dump tree without the absolute backup prefix.
pub fn create_tar_gz_archive(source_dir: &Path, archive_dest_path: &Path) -> Result<PathBuf> {
    if !source_dir.is_dir() {
        return Err(BackupError::Archive(format!(
            "source is not a directory: {}",
            source_dir.display()
        )));
    }
    if let Some(parent) = archive_dest_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let archive_file = File::create(archive_dest_path)?;
    let encoder = GzEncoder::new(archive_file, Compression::default());
    let mut builder = Builder::new(encoder);

    for entry in WalkDir::new(source_dir) {
        let entry = entry.map_err(|e| {
            BackupError::Archive(format!("walking {}: {e}", source_dir.display()))
        })?;
        let path = entry.path();
        let name = path.strip_prefix(source_dir).map_err(|e| {
            BackupError::Archive(format!("stripping prefix from {}: {e}", path.display()))
        })?;

        // The walk root maps to an empty relative path; skip it.
        if name.as_os_str().is_empty() {
            continue;
        }

        if path.is_dir() {
            builder.append_dir(name, path).map_err(|e| {
                BackupError::Archive(format!("appending dir {}: {e}", path.display()))
            })?;
        } else if path.is_file() {
            builder.append_path_with_name(path, name).map_err(|e| {
                BackupError::Archive(format!("appending file {}: {e}", path.display()))
            })?;
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| BackupError::Archive(format!("finalizing tar stream: {e}")))?;
    encoder
        .finish()
        .map_err(|e| BackupError::Archive(format!("finishing gzip stream: {e}")))?;

    info!(archive = %archive_dest_path.display(), "archive created");
    Ok(archive_dest_path.to_path_buf())
}
