use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration missing: {0}")]
    ConfigMissing(String),

    #[error("Dump tool not configured: {0}")]
    ToolNotConfigured(String),

    #[error("Dump failed (exit code {exit_code:?}): {stderr}")]
    DumpFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Encryption secret is not configured")]
    EncryptionSecretMissing,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Unsupported backup type: {0}")]
    UnsupportedType(String),

    #[error("Invalid cron schedule '{expression}': {reason}")]
    InvalidCronSchedule { expression: String, reason: String },

    #[error("Archive operation failed: {0}")]
    Archive(String),

    #[error("Store operation failed: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl BackupError {
    /// Short machine-readable tag, recorded on failed backup rows.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::ConfigMissing(_) => "CONFIG_MISSING",
            BackupError::ToolNotConfigured(_) => "TOOL_NOT_CONFIGURED",
            BackupError::DumpFailed { .. } => "DUMP_FAILED",
            BackupError::EncryptionSecretMissing => "ENCRYPTION_SECRET_MISSING",
            BackupError::EncryptionFailed(_) => "ENCRYPTION_FAILED",
            BackupError::UnsupportedType(_) => "UNSUPPORTED_TYPE",
            BackupError::InvalidCronSchedule { .. } => "INVALID_CRON_SCHEDULE",
            BackupError::Archive(_) => "ARCHIVE_FAILED",
            BackupError::Store(_) => "STORE_FAILED",
            BackupError::Io(_) => "IO_ERROR",
            BackupError::Sqlx(_) => "DATABASE_ERROR",
            BackupError::UrlParse(_) => "URL_PARSE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
