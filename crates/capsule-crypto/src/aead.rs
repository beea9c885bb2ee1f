//! Per-blob AEAD encryption under HKDF-derived data keys.
//!
//! ```text
//! data_key   = HKDF-SHA256(salt = nonce, ikm = master_key, info = "capsule:blob")
//! stored     = AEAD(data_key, nonce, plaintext)   // ciphertext || 16-byte tag
//! ```
//!
//! The nonce is not prepended to the stored bytes; it travels in the
//! manifest blob entry so the content hash covers exactly the AEAD output.

use std::fmt;
use std::str::FromStr;

use aes_gcm::Aes256Gcm;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::XChaCha20Poly1305;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::MasterKey;
use crate::KEY_SIZE;

/// HKDF `info` for blob data keys.
pub const BLOB_HKDF_INFO: &[u8] = b"capsule:blob";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AeadAlgorithm {
    #[default]
    XChaCha20Poly1305,
    Aes256Gcm,
}

impl AeadAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            AeadAlgorithm::XChaCha20Poly1305 => "xchacha20-poly1305",
            AeadAlgorithm::Aes256Gcm => "aes-256-gcm",
        }
    }

    pub fn nonce_len(self) -> usize {
        match self {
            AeadAlgorithm::XChaCha20Poly1305 => 24,
            AeadAlgorithm::Aes256Gcm => 12,
        }
    }
}

impl fmt::Display for AeadAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AeadAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xchacha20-poly1305" => Ok(AeadAlgorithm::XChaCha20Poly1305),
            "aes-256-gcm" => Ok(AeadAlgorithm::Aes256Gcm),
            other => Err(CryptoError::Key(format!("unsupported AEAD: {other}"))),
        }
    }
}

/// AEAD output plus the nonce it was sealed with.
#[derive(Debug, Clone)]
pub struct EncryptedBlob {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
}

struct DataKey([u8; KEY_SIZE]);

impl Drop for DataKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

fn derive_data_key(master: &MasterKey, nonce: &[u8]) -> CryptoResult<DataKey> {
    let hk = Hkdf::<Sha256>::new(Some(nonce), master.as_bytes());
    let mut key = DataKey([0u8; KEY_SIZE]);
    hk.expand(BLOB_HKDF_INFO, &mut key.0)
        .map_err(|e| CryptoError::Kdf(format!("HKDF expand failed: {e}")))?;
    Ok(key)
}

/// Encrypt one blob with a fresh random nonce.
pub fn encrypt_blob(
    master: &MasterKey,
    alg: AeadAlgorithm,
    plaintext: &[u8],
) -> CryptoResult<EncryptedBlob> {
    let mut nonce = vec![0u8; alg.nonce_len()];
    rand::thread_rng().fill_bytes(&mut nonce);
    let key = derive_data_key(master, &nonce)?;

    let ciphertext = match alg {
        AeadAlgorithm::XChaCha20Poly1305 => XChaCha20Poly1305::new((&key.0).into())
            .encrypt(nonce.as_slice().into(), plaintext),
        AeadAlgorithm::Aes256Gcm => {
            Aes256Gcm::new((&key.0).into()).encrypt(nonce.as_slice().into(), plaintext)
        }
    }
    .map_err(|e| CryptoError::Encrypt(format!("{alg} encryption failed: {e}")))?;

    Ok(EncryptedBlob { ciphertext, nonce })
}

/// Decrypt one blob. A wrong key or any modified byte fails authentication.
pub fn decrypt_blob(
    master: &MasterKey,
    alg: AeadAlgorithm,
    nonce: &[u8],
    ciphertext: &[u8],
) -> CryptoResult<Vec<u8>> {
    if nonce.len() != alg.nonce_len() {
        return Err(CryptoError::InvalidNonce(nonce.len()));
    }
    let key = derive_data_key(master, nonce)?;

    match alg {
        AeadAlgorithm::XChaCha20Poly1305 => {
            XChaCha20Poly1305::new((&key.0).into()).decrypt(nonce.into(), ciphertext)
        }
        AeadAlgorithm::Aes256Gcm => Aes256Gcm::new((&key.0).into()).decrypt(nonce.into(), ciphertext),
    }
    .map_err(|_| CryptoError::Decrypt)
}
