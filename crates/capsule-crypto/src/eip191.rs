//! ECDSA/secp256k1 manifest signatures with EIP-191 personal-message wrapping.
//!
//! Signer identity is the EIP-55 checksummed address: the last 20 bytes of
//! Keccak-256 over the uncompressed public key (without the `0x04` tag).
//! Keccak-256 here is the original Keccak padding, not NIST SHA3-256.

use capsule_core::types::{ManifestSignature, PAYLOAD_ALG};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};

use crate::encoding::hex_decode;
use crate::error::{CryptoError, CryptoResult, SignatureError};
use crate::signer::{ManifestSigner, SignatureScheme};

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let digest = Keccak256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Keccak-256 of `"\x19Ethereum Signed Message:\n" + len(message) + message`.
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// EIP-55 mixed-case encoding of a 20-byte address.
pub fn to_checksum_address(addr: &[u8; 20]) -> String {
    let lower = hex::encode(addr);
    let hash = keccak256(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let byte = hash[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

pub fn address_of(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&hash[12..]);
    to_checksum_address(&addr)
}

pub struct Eip191Signer {
    key: SigningKey,
}

impl Eip191Signer {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn generate() -> Self {
        Self::new(SigningKey::random(&mut rand::rngs::OsRng))
    }

    /// Parse a 32-byte private key in hex (`0x` prefix optional).
    pub fn from_hex(private_key: &str) -> CryptoResult<Self> {
        let bytes = hex_decode(private_key.trim())?;
        SigningKey::from_slice(&bytes)
            .map(Self::new)
            .map_err(|e| CryptoError::Key(format!("secp256k1 private key: {e}")))
    }

    pub fn address(&self) -> String {
        address_of(self.key.verifying_key())
    }

    /// 65-byte `r || s || v` signature over the personal-message hash, v in {27, 28}.
    pub fn sign_personal(&self, message: &[u8]) -> CryptoResult<[u8; 65]> {
        let hash = personal_message_hash(message);
        let (sig, recid) = self
            .key
            .sign_prehash_recoverable(&hash)
            .map_err(|e| CryptoError::Key(format!("secp256k1 signing: {e}")))?;
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = 27 + recid.to_byte();
        Ok(out)
    }
}

impl std::fmt::Debug for Eip191Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Eip191Signer")
            .field("address", &self.address())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl ManifestSigner for Eip191Signer {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::Secp256k1Eip191
    }

    fn identity(&self) -> String {
        self.address()
    }

    fn sign_payload(&self, payload: &[u8]) -> CryptoResult<ManifestSignature> {
        let sig = self.sign_personal(payload)?;
        Ok(ManifestSignature::Secp256k1Eip191 {
            payload_alg: PAYLOAD_ALG.into(),
            signer_address: self.address(),
            sig: hex::encode(sig),
        })
    }

    fn sign_message(&self, message: &[u8]) -> CryptoResult<String> {
        Ok(format!("0x{}", hex::encode(self.sign_personal(message)?)))
    }
}

/// Recover the signer of a personal-message signature.
pub fn recover_address(message: &[u8], sig_hex: &str) -> Result<String, SignatureError> {
    let raw = hex_decode(sig_hex).map_err(|e| SignatureError::Malformed(e.to_string()))?;
    if raw.len() != 65 {
        return Err(SignatureError::Malformed(format!(
            "sig must be 65 bytes, got {}",
            raw.len()
        )));
    }
    let v = raw[64];
    let recid = RecoveryId::from_byte(if v >= 27 { v - 27 } else { v })
        .ok_or_else(|| SignatureError::Malformed(format!("bad recovery byte: {v}")))?;
    let signature = Signature::from_slice(&raw[..64])
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    let hash = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&hash, &signature, recid)
        .map_err(|_| SignatureError::Invalid)?;
    Ok(address_of(&key))
}

/// Verify a secp256k1 signature object over `payload`; returns the recovered address.
pub fn verify(signer_address: &str, sig: &str, payload: &[u8]) -> Result<String, SignatureError> {
    let recovered = recover_address(payload, sig)?;
    if !recovered.eq_ignore_ascii_case(signer_address) {
        return Err(SignatureError::SignerMismatch);
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_is_not_sha3() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn eip55_reference_vectors() {
        for expected in [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
            "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
        ] {
            let bytes = hex_decode(expected).unwrap();
            let addr: [u8; 20] = bytes.as_slice().try_into().unwrap();
            assert_eq!(to_checksum_address(&addr), expected);
        }
    }

    #[test]
    fn address_from_known_private_key() {
        let signer = Eip191Signer::from_hex(
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .unwrap();
        assert_eq!(signer.address(), "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23");
    }

    #[test]
    fn sign_then_recover() {
        let signer = Eip191Signer::generate();
        let sig = signer.sign_personal(b"capsule:read:1700000000").unwrap();
        assert!(sig[64] == 27 || sig[64] == 28);
        let recovered = recover_address(b"capsule:read:1700000000", &hex::encode(sig)).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn verify_accepts_lowercase_declared_address() {
        let signer = Eip191Signer::generate();
        let ManifestSignature::Secp256k1Eip191 { sig, .. } = signer.sign_payload(b"payload").unwrap()
        else {
            panic!("expected secp256k1 signature");
        };
        let lower = signer.address().to_lowercase();
        assert!(verify(&lower, &sig, b"payload").is_ok());
    }

    #[test]
    fn wrong_payload_recovers_other_signer() {
        let signer = Eip191Signer::generate();
        let ManifestSignature::Secp256k1Eip191 { sig, signer_address, .. } =
            signer.sign_payload(b"payload").unwrap()
        else {
            panic!("expected secp256k1 signature");
        };
        let err = verify(&signer_address, &sig, b"payload!").unwrap_err();
        assert!(matches!(err, SignatureError::SignerMismatch | SignatureError::Invalid));
    }

    #[test]
    fn malformed_signature_is_rejected() {
        assert!(matches!(
            recover_address(b"m", "0x1234"),
            Err(SignatureError::Malformed(_))
        ));
        let mut bad = [0u8; 65];
        bad[64] = 99;
        assert!(matches!(
            recover_address(b"m", &hex::encode(bad)),
            Err(SignatureError::Malformed(_))
        ));
    }

    #[test]
    fn request_signature_is_prefixed_hex() {
        let signer = Eip191Signer::generate();
        let s = signer.sign_message(b"id:write:1").unwrap();
        assert!(s.starts_with("0x"));
        assert_eq!(s.len(), 2 + 130);
    }
}
