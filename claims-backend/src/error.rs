use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the claims store.
///
/// Parse problems inside a single block are not errors; they are reported as
/// [`ParseSkip`](crate::claims::format::ParseSkip) diagnostics and logged.
#[derive(Debug, Error)]
pub enum ClaimStoreError {
    #[error("invalid claim: {0}")]
    Validation(String),

    #[error("claim not found: {0}")]
    NotFound(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {} after {attempts} attempts: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClaimStoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ClaimStoreError::Io {
            path: path.into(),
            source,
        }
    }
}
