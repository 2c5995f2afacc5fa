use thiserror::Error;

/// Error taxonomy for the sync pipeline.
///
/// `Parse`, `Schema` and `Validation` are recoverable: the offending file or
/// row is skipped and the run continues. Connection-class errors
/// (`LocalStore`, `RemoteSource`, `Config`) abort the run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to parse {file}: {reason}")]
    Parse { file: String, reason: String },

    #[error("{file} is missing required columns after rename: {missing}")]
    Schema { file: String, missing: String },

    #[error("invalid row: {reason}")]
    Validation { reason: String },

    #[error("local store error: {0}")]
    LocalStore(#[from] rusqlite::Error),

    #[error("remote source error: {0}")]
    RemoteSource(#[from] mysql::Error),

    #[error("missing environment variable {0}")]
    Config(String),
}

impl SyncError {
    /// Connection-class errors terminate the run; everything else is
    /// recovered locally by skipping the file or row.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LocalStore(_) | Self::RemoteSource(_) | Self::Config(_)
        )
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
