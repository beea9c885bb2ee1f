//! RFC 8785 (JCS) canonicalization of manifests for signing.
//!
//! The signing payload is the canonical UTF-8 encoding of the manifest with its
//! top-level `signature` member removed. Any byte-level change to any other
//! member changes the payload and therefore invalidates the signature.

use serde_json::Value;

use crate::error::{CryptoError, CryptoResult};

/// Serialize a JSON value in JCS-canonical form.
pub fn canonicalize(value: &Value) -> CryptoResult<Vec<u8>> {
    serde_jcs::to_vec(value).map_err(|e| CryptoError::Canonical(e.to_string()))
}

/// Canonical bytes of `manifest` without its `signature` member.
pub fn signing_payload(manifest: &Value) -> CryptoResult<Vec<u8>> {
    let Value::Object(map) = manifest else {
        return Err(CryptoError::Canonical("manifest must be a JSON object".into()));
    };
    let mut stripped = map.clone();
    stripped.remove("signature");
    canonicalize(&Value::Object(stripped))
}
