use thiserror::Error;

pub type CapsuleResult<T> = Result<T, CapsuleError>;

/// The seven failure kinds a caller can map to an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Generic,
    PolicyViolation,
    SchemaInvalid,
    SignatureInvalid,
    BlobInvalid,
    DecryptFailed,
    RestoreFailed,
}

impl ErrorKind {
    /// Stable process exit code for scripting.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Generic => 1,
            ErrorKind::PolicyViolation => 2,
            ErrorKind::SchemaInvalid => 3,
            ErrorKind::SignatureInvalid => 4,
            ErrorKind::BlobInvalid => 5,
            ErrorKind::DecryptFailed => 6,
            ErrorKind::RestoreFailed => 7,
        }
    }
}

#[derive(Debug, Error)]
pub enum CapsuleError {
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("blob invalid: {0}")]
    BlobInvalid(String),

    #[error("decrypt failed: {0}")]
    DecryptFailed(String),

    #[error("restore failed: {0}")]
    RestoreFailed(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CapsuleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CapsuleError::PolicyViolation(_) => ErrorKind::PolicyViolation,
            CapsuleError::SchemaInvalid(_) => ErrorKind::SchemaInvalid,
            CapsuleError::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            CapsuleError::BlobInvalid(_) => ErrorKind::BlobInvalid,
            CapsuleError::DecryptFailed(_) => ErrorKind::DecryptFailed,
            CapsuleError::RestoreFailed(_) => ErrorKind::RestoreFailed,
            CapsuleError::Storage(_)
            | CapsuleError::Config(_)
            | CapsuleError::Io(_)
            | CapsuleError::Other(_) => ErrorKind::Generic,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.kind().exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        let cases = [
            (CapsuleError::Config("x".into()), 1),
            (CapsuleError::PolicyViolation("x".into()), 2),
            (CapsuleError::SchemaInvalid("x".into()), 3),
            (CapsuleError::SignatureInvalid("x".into()), 4),
            (CapsuleError::BlobInvalid("x".into()), 5),
            (CapsuleError::DecryptFailed("x".into()), 6),
            (CapsuleError::RestoreFailed("x".into()), 7),
        ];
        for (err, code) in cases {
            assert_eq!(err.exit_code(), code, "{err}");
        }
    }

    #[test]
    fn io_and_anyhow_are_generic() {
        let io = CapsuleError::from(std::io::Error::other("disk"));
        assert_eq!(io.kind(), ErrorKind::Generic);
        let other = CapsuleError::from(anyhow::anyhow!("boom"));
        assert_eq!(other.exit_code(), 1);
        assert_eq!(other.to_string(), "boom");
    }
}
