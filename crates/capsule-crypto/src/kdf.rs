//! Key derivation: Argon2id passphrase → per-capsule master key

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, SALT_SIZE};

/// A 256-bit master key derived from a passphrase via Argon2id.
///
/// Zeroized on drop.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id cost parameters. Output length is fixed at [`KEY_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_kib: u32,
    /// Time cost / iterations (default: 3)
    pub iterations: u32,
    /// Lanes (default: 1)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_kib: 65536,
            iterations: 3,
            parallelism: 1,
        }
    }
}

/// Fresh random salt, stored in the manifest alongside the KDF params.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit master key from a passphrase and salt using Argon2id v0x13.
pub fn derive_master_key(
    passphrase: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> CryptoResult<MasterKey> {
    if passphrase.expose_secret().is_empty() {
        return Err(CryptoError::Kdf("passphrase must not be empty".into()));
    }

    let argon2_params = Params::new(
        params.mem_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::Kdf(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::Kdf(format!("Argon2id failed: {e}")))?;

    let master = MasterKey::from_bytes(key);
    key.zeroize();
    Ok(master)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: KdfParams = KdfParams {
        mem_kib: 1024,
        iterations: 1,
        parallelism: 1,
    };

    #[test]
    fn test_kdf_deterministic() {
        let passphrase = SecretString::from("correct horse battery staple");
        let salt = [7u8; SALT_SIZE];

        let key1 = derive_master_key(&passphrase, &salt, &FAST).unwrap();
        let key2 = derive_master_key(&passphrase, &salt, &FAST).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes(), "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_salt_and_passphrase_matter() {
        let salt = [1u8; SALT_SIZE];
        let a = derive_master_key(&SecretString::from("passphrase-a"), &salt, &FAST).unwrap();
        let b = derive_master_key(&SecretString::from("passphrase-b"), &salt, &FAST).unwrap();
        let c = derive_master_key(&SecretString::from("passphrase-a"), &[2u8; SALT_SIZE], &FAST).unwrap();

        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        let err = derive_master_key(&SecretString::from(""), &[0u8; SALT_SIZE], &FAST).unwrap_err();
        assert!(matches!(err, CryptoError::Kdf(_)));
    }

    #[test]
    fn test_bad_params_rejected() {
        let params = KdfParams {
            mem_kib: 1,
            iterations: 1,
            parallelism: 1,
        };
        assert!(derive_master_key(&SecretString::from("x"), &[0u8; SALT_SIZE], &params).is_err());
    }

    #[test]
    fn test_salts_are_random() {
        assert_ne!(generate_salt(), generate_salt());
    }

    #[test]
    fn test_debug_redacted() {
        let key = MasterKey::from_bytes([9u8; KEY_SIZE]);
        assert!(!format!("{key:?}").contains('9'));
    }
}
