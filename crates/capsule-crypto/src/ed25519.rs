//! Ed25519 manifest signatures. Signer identity is the SHA-256 fingerprint
//! of the raw 32-byte public key.

use capsule_core::types::{ManifestSignature, PAYLOAD_ALG};
use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

use crate::encoding::{b64url_decode, b64url_encode, hex_decode};
use crate::error::{CryptoError, CryptoResult, SignatureError};
use crate::hash::content_hash;
use crate::signer::{ManifestSigner, SignatureScheme};

/// Fingerprint of a raw Ed25519 public key.
pub fn fingerprint(public_key: &[u8; 32]) -> String {
    content_hash(public_key)
}

pub struct Ed25519Signer {
    key: SigningKey,
}

impl Ed25519Signer {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Parse a PKCS#8 PEM private key.
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        SigningKey::from_pkcs8_pem(pem)
            .map(Self::new)
            .map_err(|e| CryptoError::Key(format!("ed25519 PEM: {e}")))
    }

    /// Parse a 32-byte hex seed.
    pub fn from_hex_seed(seed: &str) -> CryptoResult<Self> {
        let bytes = hex_decode(seed.trim())?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::Key(format!("ed25519 seed must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self::new(SigningKey::from_bytes(&seed)))
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

impl std::fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("fingerprint", &self.identity())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl ManifestSigner for Ed25519Signer {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::Ed25519
    }

    fn identity(&self) -> String {
        fingerprint(&self.public_key())
    }

    fn sign_payload(&self, payload: &[u8]) -> CryptoResult<ManifestSignature> {
        let sig = self.key.sign(payload);
        Ok(ManifestSignature::Ed25519 {
            payload_alg: PAYLOAD_ALG.into(),
            public_key: b64url_encode(&self.public_key()),
            signer_fingerprint: self.identity(),
            sig: b64url_encode(&sig.to_bytes()),
        })
    }

    fn sign_message(&self, message: &[u8]) -> CryptoResult<String> {
        Ok(b64url_encode(&self.key.sign(message).to_bytes()))
    }
}

/// Verify an Ed25519 signature object over `payload`; returns the signer fingerprint.
pub fn verify(
    public_key: &str,
    signer_fingerprint: &str,
    sig: &str,
    payload: &[u8],
) -> Result<String, SignatureError> {
    let pk_bytes = b64url_decode(public_key).map_err(|e| SignatureError::Malformed(e.to_string()))?;
    let pk: [u8; 32] = pk_bytes
        .as_slice()
        .try_into()
        .map_err(|_| SignatureError::Malformed("public_key must be 32 bytes".into()))?;

    let actual = fingerprint(&pk);
    if actual != signer_fingerprint {
        return Err(SignatureError::SignerMismatch);
    }

    let sig_bytes = b64url_decode(sig).map_err(|e| SignatureError::Malformed(e.to_string()))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|_| SignatureError::Malformed("sig must be 64 bytes".into()))?;
    let vk = VerifyingKey::from_bytes(&pk).map_err(|_| SignatureError::Invalid)?;
    vk.verify_strict(payload, &signature)
        .map_err(|_| SignatureError::Invalid)?;
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify() {
        let signer = Ed25519Signer::generate();
        let payload = br#"{"capsule_id":"x"}"#;
        let sig = signer.sign_payload(payload).unwrap();
        let ManifestSignature::Ed25519 {
            public_key,
            signer_fingerprint,
            sig,
            payload_alg,
        } = sig
        else {
            panic!("expected ed25519 signature");
        };
        assert_eq!(payload_alg, PAYLOAD_ALG);
        assert_eq!(signer_fingerprint.len(), 64);
        let id = verify(&public_key, &signer_fingerprint, &sig, payload).unwrap();
        assert_eq!(id, signer.identity());
    }

    #[test]
    fn tampered_payload_fails() {
        let signer = Ed25519Signer::generate();
        let ManifestSignature::Ed25519 {
            public_key,
            signer_fingerprint,
            sig,
            ..
        } = signer.sign_payload(b"original").unwrap()
        else {
            panic!("expected ed25519 signature");
        };
        assert_eq!(
            verify(&public_key, &signer_fingerprint, &sig, b"tampered"),
            Err(SignatureError::Invalid)
        );
    }

    #[test]
    fn fingerprint_must_match_public_key() {
        let signer = Ed25519Signer::generate();
        let other = Ed25519Signer::generate();
        let ManifestSignature::Ed25519 { public_key, sig, .. } = signer.sign_payload(b"m").unwrap()
        else {
            panic!("expected ed25519 signature");
        };
        assert_eq!(
            verify(&public_key, &other.identity(), &sig, b"m"),
            Err(SignatureError::SignerMismatch)
        );
    }

    #[test]
    fn seed_roundtrip_is_deterministic() {
        let seed = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";
        let a = Ed25519Signer::from_hex_seed(seed).unwrap();
        let b = Ed25519Signer::from_hex_seed(&format!("0x{seed}")).unwrap();
        assert_eq!(a.identity(), b.identity());
        // RFC 8032 test 1 public key
        assert_eq!(
            hex::encode(a.public_key()),
            "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a"
        );
        assert!(Ed25519Signer::from_hex_seed("abcd").is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let signer = Ed25519Signer::generate();
        let dbg = format!("{signer:?}");
        assert!(dbg.contains("REDACTED"));
    }
}
