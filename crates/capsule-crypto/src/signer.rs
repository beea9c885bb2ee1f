//! Pluggable signing schemes and manifest verification.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use capsule_core::types::{ManifestSignature, PAYLOAD_ALG};
use serde_json::Value;
use tracing::debug;

use crate::canonical::signing_payload;
use crate::ed25519::{self, Ed25519Signer};
use crate::eip191::{self, Eip191Signer};
use crate::error::{CryptoError, CryptoResult, SignatureError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureScheme {
    Ed25519,
    Secp256k1Eip191,
}

impl SignatureScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            SignatureScheme::Ed25519 => "ed25519",
            SignatureScheme::Secp256k1Eip191 => "ecdsa_secp256k1_eip191",
        }
    }
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureScheme {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519" => Ok(SignatureScheme::Ed25519),
            "ecdsa_secp256k1_eip191" | "secp256k1" | "eip191" => Ok(SignatureScheme::Secp256k1Eip191),
            other => Err(CryptoError::Key(format!("unknown signature scheme: {other}"))),
        }
    }
}

/// A signing identity able to seal manifests and authenticate requests.
pub trait ManifestSigner: Send + Sync {
    fn scheme(&self) -> SignatureScheme;

    /// Public identity derived from the key (fingerprint or address).
    fn identity(&self) -> String;

    /// Sign canonical manifest bytes.
    fn sign_payload(&self, payload: &[u8]) -> CryptoResult<ManifestSignature>;

    /// Sign an arbitrary message, encoded for transport.
    fn sign_message(&self, message: &[u8]) -> CryptoResult<String>;
}

/// Parse key material for `scheme`.
///
/// Ed25519 accepts a PKCS#8 PEM block or a 32-byte hex seed; secp256k1
/// accepts a 32-byte hex private key.
pub fn load_signer(scheme: SignatureScheme, material: &str) -> CryptoResult<Arc<dyn ManifestSigner>> {
    let material = material.trim();
    match scheme {
        SignatureScheme::Ed25519 if material.starts_with("-----BEGIN") => {
            Ok(Arc::new(Ed25519Signer::from_pem(material)?))
        }
        SignatureScheme::Ed25519 => Ok(Arc::new(Ed25519Signer::from_hex_seed(material)?)),
        SignatureScheme::Secp256k1Eip191 => Ok(Arc::new(Eip191Signer::from_hex(material)?)),
    }
}

/// Identities a verifier accepts as legitimate signers.
///
/// Fingerprints compare exactly; `0x` addresses compare case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct TrustSet {
    identities: Vec<String>,
}

impl TrustSet {
    pub fn new<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identities: identities.into_iter().map(Into::into).collect(),
        }
    }

    pub fn insert(&mut self, identity: impl Into<String>) {
        self.identities.push(identity.into());
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.identities.iter().any(|trusted| {
            if trusted.starts_with("0x") || identity.starts_with("0x") {
                trusted.eq_ignore_ascii_case(identity)
            } else {
                trusted == identity
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }
}

/// Sign a manifest value; the existing `signature` member is ignored.
pub fn sign_manifest(manifest: &Value, signer: &dyn ManifestSigner) -> CryptoResult<ManifestSignature> {
    let payload = signing_payload(manifest)?;
    let sig = signer.sign_payload(&payload)?;
    debug!(scheme = %signer.scheme(), signer = %signer.identity(), "manifest signed");
    Ok(sig)
}

/// Verify a stored manifest against `trusted`; returns the verified signer identity.
///
/// Rejects a missing, empty, or malformed signature object before any
/// cryptographic work is attempted.
pub fn verify_manifest(manifest: &Value, trusted: &TrustSet) -> Result<String, SignatureError> {
    let sig_value = match manifest.get("signature") {
        Some(Value::Object(map)) if !map.is_empty() => Value::Object(map.clone()),
        Some(Value::Object(_)) | Some(Value::Null) | None => return Err(SignatureError::Missing),
        Some(_) => return Err(SignatureError::Malformed("signature must be an object".into())),
    };
    let sig: ManifestSignature =
        serde_json::from_value(sig_value).map_err(|e| SignatureError::Malformed(e.to_string()))?;
    if sig.payload_alg() != PAYLOAD_ALG {
        return Err(SignatureError::UnsupportedPayload(sig.payload_alg().to_string()));
    }

    let payload = signing_payload(manifest).map_err(|e| SignatureError::Malformed(e.to_string()))?;
    let identity = match &sig {
        ManifestSignature::Ed25519 {
            public_key,
            signer_fingerprint,
            sig,
            ..
        } => ed25519::verify(public_key, signer_fingerprint, sig, &payload)?,
        ManifestSignature::Secp256k1Eip191 {
            signer_address, sig, ..
        } => eip191::verify(signer_address, sig, &payload)?,
    };

    if !trusted.contains(&identity) {
        return Err(SignatureError::Untrusted(identity));
    }
    debug!(alg = sig.alg(), signer = %identity, "manifest signature verified");
    Ok(identity)
}
