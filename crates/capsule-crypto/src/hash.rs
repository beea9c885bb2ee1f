//! Content addressing: SHA-256, lowercase hex.

use sha2::{Digest, Sha256};

/// Raw SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Content hash used for blob ids and plaintext integrity checks (64 hex chars).
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// True if `candidate` is a well-formed content hash.
pub fn is_content_hash(candidate: &str) -> bool {
    candidate.len() == 64
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
