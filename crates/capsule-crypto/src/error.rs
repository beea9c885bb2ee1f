use capsule_core::CapsuleError;
use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Why a manifest signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("manifest missing signature object")]
    Missing,

    #[error("manifest signature is malformed: {0}")]
    Malformed(String),

    #[error("unsupported payload_alg: {0}")]
    UnsupportedPayload(String),

    #[error("invalid manifest signature")]
    Invalid,

    #[error("recovered signer does not match declared signer")]
    SignerMismatch,

    #[error("signer is not trusted: {0}")]
    Untrusted(String),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error("decryption failed: invalid key or corrupted data")]
    Decrypt,

    #[error("nonce has wrong length: {0} bytes")]
    InvalidNonce(usize),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("invalid key material: {0}")]
    Key(String),

    #[error("canonicalization failed: {0}")]
    Canonical(String),

    #[error("encoding error: {0}")]
    Encoding(String),
}

impl From<SignatureError> for CapsuleError {
    fn from(e: SignatureError) -> Self {
        CapsuleError::SignatureInvalid(e.to_string())
    }
}

impl From<CryptoError> for CapsuleError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Signature(sig) => sig.into(),
            CryptoError::Decrypt | CryptoError::InvalidNonce(_) => {
                CapsuleError::DecryptFailed(e.to_string())
            }
            CryptoError::Kdf(_) | CryptoError::Key(_) => CapsuleError::Config(e.to_string()),
            other => CapsuleError::Other(anyhow::anyhow!(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsule_core::ErrorKind;

    #[test]
    fn crypto_errors_map_to_capsule_kinds() {
        let cases = [
            (CryptoError::Decrypt, ErrorKind::DecryptFailed),
            (CryptoError::InvalidNonce(3), ErrorKind::DecryptFailed),
            (CryptoError::Signature(SignatureError::Invalid), ErrorKind::SignatureInvalid),
            (CryptoError::Kdf("empty".into()), ErrorKind::Generic),
            (CryptoError::Canonical("nan".into()), ErrorKind::Generic),
        ];
        for (err, kind) in cases {
            assert_eq!(CapsuleError::from(err).kind(), kind);
        }
    }
}
