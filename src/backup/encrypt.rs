//! At-rest encryption of backup artifacts.
//!
//! File format: 12-byte random nonce prefix, then AES-256-GCM ciphertext with
//! the trailing auth tag. The file is self-describing; decryption needs only
//! the operator secret. The key is the SHA-256 digest of the secret and is
//! never persisted or logged.

use std::path::{Path, PathBuf};

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::info;

use crate::config::AppConfig;
use crate::errors::{BackupError, Result};

/// Suffix appended to an artifact path once encrypted.
pub const ENCRYPTED_SUFFIX: &str = ".enc";

/// `{input}.enc`, keeping the original extension visible.
pub fn encrypted_path(input: &Path) -> PathBuf {
    let mut os = input.as_os_str().to_os_string();
    os.push(ENCRYPTED_SUFFIX);
    PathBuf::from(os)
}

fn derive_key(secret: &str) -> Result<LessSafeKey> {
    let key_bytes = digest(&SHA256, secret.as_bytes());
    let unbound = UnboundKey::new(&AES_256_GCM, key_bytes.as_ref())
        .map_err(|_| BackupError::EncryptionFailed("key derivation failed".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypts `input_path` into its `.enc` sibling and returns that path.
pub async fn encrypt_file(app_config: &AppConfig, input_path: &Path) -> Result<PathBuf> {
    // Secret presence is checked before touching the filesystem.
    let secret = app_config.encryption_secret()?;
    let key = derive_key(secret)?;

    let plaintext = fs::read(input_path).await?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| BackupError::EncryptionFailed("nonce generation failed".to_string()))?;

    let mut in_out = plaintext;
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce_bytes),
        Aad::empty(),
        &mut in_out,
    )
    .map_err(|_| BackupError::EncryptionFailed("seal failed".to_string()))?;

    let output_path = encrypted_path(input_path);
    let mut contents = Vec::with_capacity(NONCE_LEN + in_out.len());
    contents.extend_from_slice(&nonce_bytes);
    contents.extend_from_slice(&in_out);
    fs::write(&output_path, contents).await?;

    info!(artifact = %output_path.display(), "artifact encrypted");
    Ok(output_path)
}

/// Exact inverse of [`encrypt_file`]: splits the nonce prefix, authenticates
/// and decrypts the remainder into `output_path`. A wrong secret or corrupted
/// ciphertext fails the tag check.
pub async fn decrypt_file(
    app_config: &AppConfig,
    input_path: &Path,
    output_path: &Path,
) -> Result<()> {
    let plaintext = decrypt_bytes(app_config, input_path).await?;
    fs::write(output_path, plaintext).await?;
    Ok(())
}

/// Decrypts into a temp file that is removed when the returned handle drops,
/// covering every exit path of the download response.
pub async fn decrypt_to_temp(app_config: &AppConfig, input_path: &Path) -> Result<NamedTempFile> {
    let plaintext = decrypt_bytes(app_config, input_path).await?;
    let file = NamedTempFile::new()?;
    std::fs::write(file.path(), plaintext)?;
    Ok(file)
}

async fn decrypt_bytes(app_config: &AppConfig, input_path: &Path) -> Result<Vec<u8>> {
    let secret = app_config.encryption_secret()?;
    let key = derive_key(secret)?;

    let contents = fs::read(input_path).await?;
    if contents.len() < NONCE_LEN {
        return Err(BackupError::EncryptionFailed(format!(
            "encrypted file too short: {}",
            input_path.display()
        )));
    }

    let (nonce_bytes, ciphertext) = contents.split_at(NONCE_LEN);
    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
        .map_err(|_| BackupError::EncryptionFailed("invalid nonce prefix".to_string()))?;

    let mut in_out = ciphertext.to_vec();
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| {
            BackupError::EncryptionFailed("authentication failed (wrong secret or corrupted file)".to_string())
        })?;

    Ok(plaintext.to_vec())
}
