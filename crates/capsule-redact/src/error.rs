use capsule_core::{CapsuleError, PathError};
use thiserror::Error;

pub type RedactResult<T> = Result<T, RedactError>;

#[derive(Debug, Error)]
pub enum RedactError {
    #[error("invalid glob {pattern:?}: {message}")]
    InvalidGlob { pattern: String, message: String },

    #[error("invalid detector pattern in rule {rule_id}: {message}")]
    InvalidPattern { rule_id: String, message: String },

    #[error("workspace path rejected: {0}")]
    Path(#[from] PathError),

    #[error("detector config hash failed: {0}")]
    ConfigHash(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RedactError> for CapsuleError {
    fn from(e: RedactError) -> Self {
        match e {
            RedactError::Io(io) => CapsuleError::Io(io),
            RedactError::InvalidGlob { .. } | RedactError::InvalidPattern { .. } => {
                CapsuleError::Config(e.to_string())
            }
            other => CapsuleError::Other(anyhow::anyhow!(other.to_string())),
        }
    }
}
