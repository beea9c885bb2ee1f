use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration (loaded from capsule.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapsuleConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub signing: SigningConfig,
    pub trust: TrustConfig,
    pub policy: PolicyConfig,
    pub crypto: CryptoConfig,
    pub compression: CompressionConfig,
}

impl CapsuleConfig {
    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml(s: &str) -> crate::CapsuleResult<Self> {
        toml::from_str(s).map_err(|e| crate::CapsuleError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend name: "local_dir", "s3", or "presigned_url"
    pub backend: String,
    /// Root directory for the local_dir backend
    pub root: PathBuf,
    /// S3-compatible endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Key prefix inside the bucket
    pub prefix: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
    /// Base URL of the credential service issuing presigned URLs
    pub credential_service_url: Option<String>,
    /// Timeout for credential service and transfer requests
    pub http_timeout_secs: u64,
    /// Directory-backed URL cache shared across processes (optional)
    pub url_cache_dir: Option<PathBuf>,
    /// Treat cached URLs as expired this many seconds early
    pub url_cache_buffer_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// "ed25519" or "ecdsa_secp256k1_eip191"
    pub scheme: String,
    /// PEM (ed25519) or hex private key file
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Trusted signer fingerprints or addresses
    pub identities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub policy_version: String,
    /// Files larger than this are classified forbidden (0 disables the check)
    pub size_limit_bytes: u64,
    pub include_sensitive: bool,
    pub allow_forbidden: bool,
    /// Abort export when any file is classified forbidden
    pub strict: bool,
    /// Globs appended to the default allowlist
    pub extra_allowlist: Vec<String>,
    /// Globs appended to the default denylist
    pub extra_denylist: Vec<String>,
}

/// Optional blob encryption
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub enabled: bool,
    /// "xchacha20-poly1305" or "aes-256-gcm"
    pub aead: String,
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_kib: u32,
    /// Argon2id iterations (default: 3)
    pub argon2_iterations: u32,
    /// Argon2id parallelism (default: 1)
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// 0-9
    pub level: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "local_dir".into(),
            root: PathBuf::from("./capsule-store"),
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "capsules".into(),
            prefix: String::new(),
            enforce_tls: false,
            credential_service_url: None,
            http_timeout_secs: 60,
            url_cache_dir: None,
            url_cache_buffer_secs: 300,
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            scheme: "ed25519".into(),
            key_file: None,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            policy_version: "v1.0.0".into(),
            size_limit_bytes: 10 * 1024 * 1024,
            include_sensitive: false,
            allow_forbidden: false,
            strict: true,
            extra_allowlist: Vec::new(),
            extra_denylist: Vec::new(),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            aead: "xchacha20-poly1305".into(),
            argon2_mem_kib: 65536,
            argon2_iterations: 3,
            argon2_parallelism: 1,
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: 9,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[logging]
level = "debug"
format = "json"

[storage]
backend = "s3"
endpoint = "https://s3.example.com"
region = "eu-west-1"
bucket = "souls"
prefix = "prod"
enforce_tls = true
url_cache_buffer_secs = 60

[signing]
scheme = "ecdsa_secp256k1_eip191"
key_file = "/etc/capsule/signer.hex"

[trust]
identities = ["0xAbC0000000000000000000000000000000000001"]

[policy]
strict = false
include_sensitive = true
extra_denylist = ["**/*.sqlite"]

[crypto]
enabled = true
aead = "aes-256-gcm"
argon2_mem_kib = 1024

[compression]
enabled = true
level = 5
"#;
        let cfg = CapsuleConfig::from_toml(toml_str).unwrap();
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.storage.backend, "s3");
        assert_eq!(cfg.storage.prefix, "prod");
        assert!(cfg.storage.enforce_tls);
        assert_eq!(cfg.storage.url_cache_buffer_secs, 60);
        assert_eq!(cfg.signing.scheme, "ecdsa_secp256k1_eip191");
        assert_eq!(cfg.trust.identities.len(), 1);
        assert!(!cfg.policy.strict);
        assert!(cfg.policy.include_sensitive);
        assert_eq!(cfg.policy.extra_denylist, vec!["**/*.sqlite"]);
        assert!(cfg.crypto.enabled);
        assert_eq!(cfg.crypto.aead, "aes-256-gcm");
        assert_eq!(cfg.crypto.argon2_mem_kib, 1024);
        assert_eq!(cfg.crypto.argon2_iterations, 3);
        assert!(cfg.compression.enabled);
        assert_eq!(cfg.compression.level, 5);
    }

    #[test]
    fn test_parse_defaults() {
        let cfg = CapsuleConfig::from_toml("").unwrap();
        assert_eq!(cfg.logging.format, "text");
        assert_eq!(cfg.storage.backend, "local_dir");
        assert_eq!(cfg.storage.http_timeout_secs, 60);
        assert_eq!(cfg.signing.scheme, "ed25519");
        assert!(cfg.policy.strict);
        assert_eq!(cfg.policy.size_limit_bytes, 10 * 1024 * 1024);
        assert!(!cfg.crypto.enabled);
        assert_eq!(cfg.compression.level, 9);
    }

    #[test]
    fn test_parse_partial_config() {
        let cfg = CapsuleConfig::from_toml(
            r#"
[storage]
root = "/var/lib/capsules"
"#,
        )
        .unwrap();
        assert_eq!(cfg.storage.root, PathBuf::from("/var/lib/capsules"));
        assert_eq!(cfg.storage.region, "us-east-1");
        assert_eq!(cfg.policy.policy_version, "v1.0.0");
    }

    #[test]
    fn test_parse_rejects_bad_types() {
        let err = CapsuleConfig::from_toml("[compression]\nlevel = \"max\"\n").unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
