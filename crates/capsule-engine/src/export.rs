//! Export: workspace → redaction report → blobs → signed manifest.
//!
//! ```text
//! scan ─┬─ strict + forbidden ──→ persist report, PolicyViolation
//!       ├─ dry run ─────────────→ persist report, done
//!       └─ blobs (per file | one archive) → manifest → sign
//!            → schema check (report, manifest) → persist report → persist manifest
//! ```
//!
//! The manifest is always the last write, so a failed export never leaves a
//! manifest behind; blobs already stored stay orphaned and unreferenced.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use capsule_core::types::{
    AccessControl, ArtifactEntry, ArtifactKind, BlobEntry, CapsuleManifest, CompressionInfo,
    CryptoInfo, Decision, KdfParamsInfo, RedactionRef, RedactionReport, StorageRef, ToolInfo,
    MANIFEST_DOCUMENT, MANIFEST_SCHEMA_VERSION, REDACTION_REPORT_DOCUMENT, SPEC_VERSION,
};
use capsule_core::{document_bytes, new_capsule_id, utc_now_rfc3339, CapsuleError, CapsuleResult};
use capsule_crypto::{
    b64url_encode, content_hash, derive_master_key, encrypt_blob, generate_salt, sign_manifest,
    AeadAlgorithm, KdfParams, ManifestSigner, MasterKey, KEY_SIZE,
};
use capsule_redact::{RedactionPolicy, WorkspaceScan};
use secrecy::SecretString;
use tracing::{debug, info, warn};

use crate::archive::{build_archive, ARCHIVE_FORMAT, COMPRESSION_ALGORITHM};
use crate::engine::CapsuleEngine;
use crate::schema::DocumentKind;

pub const TOOL_NAME: &str = "capsule";
pub const KDF_NAME: &str = "hkdf-sha256";
pub const KEY_SOURCE: &str = "passphrase_argon2id";

/// Passphrase-based blob encryption.
pub struct EncryptionOptions {
    pub passphrase: SecretString,
    pub aead: AeadAlgorithm,
    pub kdf: KdfParams,
}

impl std::fmt::Debug for EncryptionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionOptions")
            .field("passphrase", &"[REDACTED]")
            .field("aead", &self.aead)
            .field("kdf", &self.kdf)
            .finish()
    }
}

#[derive(Debug)]
pub struct ExportOptions {
    pub policy: RedactionPolicy,
    /// Abort when anything is classified forbidden.
    pub strict: bool,
    /// Persist the redaction report only.
    pub dry_run: bool,
    /// Bundle included files into one tar+zstd blob at this level (0-9).
    pub compression_level: Option<u32>,
    pub encryption: Option<EncryptionOptions>,
    pub access: Option<AccessControl>,
}

impl ExportOptions {
    pub fn new(policy: RedactionPolicy) -> Self {
        Self {
            policy,
            strict: true,
            dry_run: false,
            compression_level: None,
            encryption: None,
            access: None,
        }
    }
}

/// What an export produced. `manifest` is `None` for dry runs.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub capsule_id: String,
    pub report: RedactionReport,
    pub manifest: Option<CapsuleManifest>,
}

/// Per-capsule encryption state: one master key, one AEAD.
struct Sealer {
    master: MasterKey,
    aead: AeadAlgorithm,
    info: CryptoInfo,
}

impl Sealer {
    fn derive(opts: &EncryptionOptions) -> CapsuleResult<Self> {
        let salt = generate_salt();
        let master = derive_master_key(&opts.passphrase, &salt, &opts.kdf)?;
        let info = CryptoInfo {
            aead: opts.aead.name().into(),
            kdf: KDF_NAME.into(),
            key_source: KEY_SOURCE.into(),
            hkdf_info: String::from_utf8_lossy(capsule_crypto::BLOB_HKDF_INFO).into_owned(),
            kdf_params: KdfParamsInfo {
                alg: "argon2id".into(),
                salt: b64url_encode(&salt),
                mem_kib: opts.kdf.mem_kib,
                iterations: opts.kdf.iterations,
                parallelism: opts.kdf.parallelism,
                hash_len: KEY_SIZE as u32,
            },
        };
        Ok(Self {
            master,
            aead: opts.aead,
            info,
        })
    }
}

/// Bytes ready for the backend plus the nonce they were sealed with.
struct Stored {
    bytes: Vec<u8>,
    nonce: Option<String>,
}

fn seal(sealer: Option<&Sealer>, plaintext: Vec<u8>) -> CapsuleResult<Stored> {
    match sealer {
        Some(s) => {
            let sealed = encrypt_blob(&s.master, s.aead, &plaintext)?;
            Ok(Stored {
                bytes: sealed.ciphertext,
                nonce: Some(b64url_encode(&sealed.nonce)),
            })
        }
        None => Ok(Stored {
            bytes: plaintext,
            nonce: None,
        }),
    }
}

impl CapsuleEngine {
    /// Run the export pipeline over `workspace`.
    ///
    /// `signer` is optional only for dry runs; a real export without one fails.
    pub async fn export(
        &self,
        workspace: &Path,
        signer: Option<Arc<dyn ManifestSigner>>,
        opts: ExportOptions,
    ) -> CapsuleResult<ExportOutcome> {
        let owner = signer.as_ref().map(|s| s.identity());
        let capsule_id = new_capsule_id(owner.as_deref());

        let included_as = if opts.encryption.is_some() {
            Decision::IncludeEncrypted
        } else {
            Decision::IncludePlaintext
        };
        let policy = opts.policy.clone().with_included_as(included_as);
        let WorkspaceScan { report, sources } = policy.scan(workspace, &capsule_id)?;
        let report_value = serde_json::to_value(&report).map_err(anyhow::Error::from)?;

        if opts.strict && report.has_forbidden() {
            let forbidden: Vec<&str> = report
                .decisions
                .iter()
                .filter(|d| d.classification == capsule_core::types::Classification::Forbidden)
                .map(|d| d.path.as_str())
                .collect();
            self.persist_report(&capsule_id, &report_value).await?;
            warn!(capsule_id = %capsule_id, forbidden = forbidden.len(), "strict export aborted");
            return Err(CapsuleError::PolicyViolation(format!(
                "forbidden content in {} file(s): {}",
                forbidden.len(),
                forbidden.join(", ")
            )));
        }

        if opts.dry_run {
            self.persist_report(&capsule_id, &report_value).await?;
            info!(capsule_id = %capsule_id, "dry run: report only");
            return Ok(ExportOutcome {
                capsule_id,
                report,
                manifest: None,
            });
        }

        let signer = signer
            .ok_or_else(|| CapsuleError::Config("export requires a signing key".into()))?;

        let sealer = opts.encryption.as_ref().map(Sealer::derive).transpose()?;

        let included: Vec<(String, Decision)> = report
            .included()
            .map(|d| (d.path.clone(), d.decision))
            .collect();

        let mut files = BTreeMap::new();
        for (path, _) in &included {
            // the on-disk name may differ from the normalized report path
            let full = sources
                .get(path)
                .cloned()
                .unwrap_or_else(|| workspace.join(path));
            let data = tokio::fs::read(&full).await.map_err(|e| {
                CapsuleError::Other(anyhow::anyhow!("reading {}: {e}", full.display()))
            })?;
            files.insert(path.clone(), data);
        }

        let (artifacts, blobs, compression) = match opts.compression_level {
            Some(level) if !files.is_empty() => {
                self.store_archive(&capsule_id, &included, files, level, sealer.as_ref())
                    .await?
            }
            _ => {
                let (artifacts, blobs) = self
                    .store_files(&capsule_id, &included, files, sealer.as_ref())
                    .await?;
                (artifacts, blobs, CompressionInfo::disabled())
            }
        };

        let mut manifest = CapsuleManifest {
            spec_version: SPEC_VERSION.into(),
            schema_version: MANIFEST_SCHEMA_VERSION.into(),
            capsule_id: capsule_id.clone(),
            created_at: utc_now_rfc3339(),
            tool: ToolInfo {
                name: TOOL_NAME.into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            artifacts,
            blobs,
            compression: Some(compression),
            access: opts.access.clone(),
            redaction: RedactionRef {
                report_path: REDACTION_REPORT_DOCUMENT.into(),
                policy_version: report.policy_version.clone(),
            },
            crypto: sealer.as_ref().map(|s| s.info.clone()),
            signature: None,
        };

        let unsigned = serde_json::to_value(&manifest).map_err(anyhow::Error::from)?;
        manifest.signature = Some(sign_manifest(&unsigned, signer.as_ref())?);
        let manifest_value = serde_json::to_value(&manifest).map_err(anyhow::Error::from)?;

        self.schemas
            .validate(DocumentKind::RedactionReport, &report_value)?;
        self.schemas.validate(DocumentKind::Manifest, &manifest_value)?;

        self.persist_report(&capsule_id, &report_value).await?;
        let manifest_bytes = document_bytes(&manifest_value).map_err(anyhow::Error::from)?;
        self.backend
            .put_document(&capsule_id, MANIFEST_DOCUMENT, &manifest_bytes)
            .await?;

        info!(
            capsule_id = %capsule_id,
            backend = self.backend.name(),
            artifacts = manifest.artifacts.len(),
            blobs = manifest.blobs.len(),
            encrypted = manifest.crypto.is_some(),
            compressed = manifest.is_compressed(),
            "capsule exported"
        );

        Ok(ExportOutcome {
            capsule_id,
            report,
            manifest: Some(manifest),
        })
    }

    async fn persist_report(&self, capsule_id: &str, report: &serde_json::Value) -> CapsuleResult<()> {
        let bytes = document_bytes(report).map_err(anyhow::Error::from)?;
        self.backend
            .put_document(capsule_id, REDACTION_REPORT_DOCUMENT, &bytes)
            .await?;
        debug!(capsule_id, bytes = bytes.len(), "redaction report persisted");
        Ok(())
    }

    async fn put(&self, capsule_id: &str, stored: Stored) -> CapsuleResult<BlobEntry> {
        let hash = content_hash(&stored.bytes);
        let locator = self.backend.put_blob(capsule_id, &hash, &stored.bytes).await?;
        debug!(capsule_id, blob_id = %hash, bytes = stored.bytes.len(), "blob stored");
        Ok(BlobEntry {
            blob_id: hash.clone(),
            hash,
            size_bytes: stored.bytes.len() as u64,
            storage: StorageRef {
                backend: self.backend.name().into(),
                locator,
            },
            nonce: stored.nonce,
            is_archive: false,
            archive_format: None,
        })
    }

    /// One blob per included file.
    async fn store_files(
        &self,
        capsule_id: &str,
        included: &[(String, Decision)],
        mut files: BTreeMap<String, Vec<u8>>,
        sealer: Option<&Sealer>,
    ) -> CapsuleResult<(Vec<ArtifactEntry>, Vec<BlobEntry>)> {
        let mut artifacts = Vec::with_capacity(included.len());
        let mut blobs: Vec<BlobEntry> = Vec::with_capacity(included.len());

        for (path, mode) in included {
            let data = files.remove(path).unwrap_or_default();
            let plaintext_hash = content_hash(&data);
            let size_bytes = data.len() as u64;

            let stored = seal(sealer, data)?;
            let stored_hash = content_hash(&stored.bytes);
            // identical plaintext files share one blob entry
            let blob_id = if blobs.iter().any(|b| b.hash == stored_hash) {
                stored_hash
            } else {
                let entry = self.put(capsule_id, stored).await?;
                let id = entry.blob_id.clone();
                blobs.push(entry);
                id
            };

            artifacts.push(ArtifactEntry {
                path: path.clone(),
                kind: ArtifactKind::for_path(path),
                mode: *mode,
                plaintext_hash,
                size_bytes,
                blob_id,
            });
        }
        Ok((artifacts, blobs))
    }

    /// All included files in one archive blob shared by every artifact.
    async fn store_archive(
        &self,
        capsule_id: &str,
        included: &[(String, Decision)],
        files: BTreeMap<String, Vec<u8>>,
        level: u32,
        sealer: Option<&Sealer>,
    ) -> CapsuleResult<(Vec<ArtifactEntry>, Vec<BlobEntry>, CompressionInfo)> {
        let digests: BTreeMap<&str, (String, u64)> = files
            .iter()
            .map(|(p, d)| (p.as_str(), (content_hash(d), d.len() as u64)))
            .collect();

        let (archive, stats) = build_archive(&files, level)
            .map_err(|e| CapsuleError::Other(anyhow::anyhow!("building archive: {e}")))?;
        let mut entry = self.put(capsule_id, seal(sealer, archive)?).await?;
        entry.is_archive = true;
        entry.archive_format = Some(ARCHIVE_FORMAT.into());

        let artifacts = included
            .iter()
            .map(|(path, mode)| {
                let (plaintext_hash, size_bytes) =
                    digests.get(path.as_str()).cloned().unwrap_or_default();
                ArtifactEntry {
                    path: path.clone(),
                    kind: ArtifactKind::for_path(path),
                    mode: *mode,
                    plaintext_hash,
                    size_bytes,
                    blob_id: entry.blob_id.clone(),
                }
            })
            .collect();

        let compression = CompressionInfo {
            enabled: true,
            algorithm: Some(COMPRESSION_ALGORITHM.into()),
            level: Some(level),
            original_size_bytes: Some(stats.original_size_bytes),
            compressed_size_bytes: Some(stats.compressed_size_bytes),
            compression_ratio: Some(stats.ratio()),
        };
        info!(
            capsule_id,
            files = files.len(),
            original = stats.original_size_bytes,
            compressed = stats.compressed_size_bytes,
            "archive stored"
        );
        Ok((artifacts, vec![entry], compression))
    }
}
