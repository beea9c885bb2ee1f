//! capsule-crypto: content addressing, manifest signing and blob encryption
//!
//! Signing:
//! ```text
//! manifest (signature removed) → RFC 8785 JCS bytes → scheme.sign
//!   ├── ed25519                  identity = sha256hex(public_key)
//!   └── ecdsa_secp256k1_eip191   identity = EIP-55 address (keccak256)
//! ```
//!
//! Optional encryption:
//! ```text
//! Master Key (256-bit, Argon2id from passphrase + 16-byte salt)
//!   └── Blob data key (HKDF-SHA256, salt = nonce, info = "capsule:blob")
//!       └── XChaCha20-Poly1305 | AES-256-GCM
//! ```

pub mod aead;
pub mod canonical;
pub mod ed25519;
pub mod eip191;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod kdf;
pub mod signer;

pub use aead::{decrypt_blob, encrypt_blob, AeadAlgorithm, EncryptedBlob, BLOB_HKDF_INFO};
pub use canonical::{canonicalize, signing_payload};
pub use ed25519::Ed25519Signer;
pub use eip191::{keccak256, to_checksum_address, Eip191Signer};
pub use encoding::{b64url_decode, b64url_encode};
pub use error::{CryptoError, CryptoResult, SignatureError};
pub use hash::{content_hash, is_content_hash, sha256};
pub use kdf::{derive_master_key, generate_salt, KdfParams, MasterKey};
pub use signer::{load_signer, sign_manifest, verify_manifest, ManifestSigner, SignatureScheme, TrustSet};

/// Size of a master or data key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the Argon2id salt
pub const SALT_SIZE: usize = 16;

/// Size of a Poly1305 / GCM authentication tag
pub const TAG_SIZE: usize = 16;
