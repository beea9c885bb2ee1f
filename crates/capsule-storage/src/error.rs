use capsule_core::{CapsuleError, PathError};
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid ref: {0}")]
    InvalidRef(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<PathError> for StorageError {
    fn from(e: PathError) -> Self {
        StorageError::InvalidRef(e.to_string())
    }
}

impl From<opendal::Error> for StorageError {
    fn from(e: opendal::Error) -> Self {
        if e.kind() == opendal::ErrorKind::NotFound {
            StorageError::NotFound(e.to_string())
        } else {
            StorageError::Backend(e.to_string())
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        if e.status() == Some(reqwest::StatusCode::NOT_FOUND) {
            StorageError::NotFound(e.to_string())
        } else {
            StorageError::Http(e.to_string())
        }
    }
}

impl From<StorageError> for CapsuleError {
    fn from(e: StorageError) -> Self {
        CapsuleError::Storage(e.to_string())
    }
}
