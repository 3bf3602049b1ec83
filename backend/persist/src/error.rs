use thiserror::Error;

/// Failures surfaced by a `Persister`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistError {
    #[error("persister not initialized")]
    NotInitialized,

    #[error("persister already initialized")]
    AlreadyInitialized,

    #[error("write denied: {0}")]
    WriteDenied(String),

    #[error("state is not serializable: {0}")]
    InvalidState(String),

    #[error("invalid partition name {0:?}")]
    InvalidPartition(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for PersistError {
    fn from(err: rusqlite::Error) -> Self {
        PersistError::Backend(err.to_string())
    }
}

impl From<std::io::Error> for PersistError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => PersistError::WriteDenied(err.to_string()),
            _ => PersistError::Backend(err.to_string()),
        }
    }
}
