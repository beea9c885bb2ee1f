//! Import and validate.
//!
//! Both start from [`CapsuleEngine::load_manifest`], which runs the checks in
//! a fixed order so each failure lands in exactly one error kind:
//!
//! 1. `spec_version` supported          → SchemaInvalid
//! 2. signature object present          → SignatureInvalid
//! 3. manifest matches its schema       → SchemaInvalid
//! 4. signature verifies, signer trusted → SignatureInvalid
//! 5. blob references are consistent    → SchemaInvalid
//!
//! Blob bytes are then checked against their content hash (BlobInvalid),
//! decrypted when the capsule is encrypted (DecryptFailed), and compared with
//! each artifact's plaintext hash (BlobInvalid).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use capsule_core::types::{
    ArtifactEntry, BlobEntry, CapsuleManifest, FailedFile, RestoreReport, RestoreResults,
    RestoredFile, SkippedFile, MANIFEST_DOCUMENT, REPORT_SCHEMA_VERSION, SPEC_VERSION,
};
use capsule_core::{document_bytes, utc_now_rfc3339, validate_relpath, CapsuleError, CapsuleResult};
use capsule_crypto::{
    b64url_decode, content_hash, decrypt_blob, derive_master_key, verify_manifest, AeadAlgorithm,
    KdfParams, MasterKey, SignatureError, TrustSet,
};
use secrecy::SecretString;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::archive::read_archive;
use crate::engine::CapsuleEngine;
use crate::export::{KDF_NAME, KEY_SOURCE};
use crate::schema::DocumentKind;

pub const REASON_EXISTS: &str = "exists";
pub const REASON_OVERWRITE: &str = "overwrite";

/// A manifest that passed every structural and signature check.
#[derive(Debug, Clone)]
pub struct VerifiedManifest {
    pub manifest: CapsuleManifest,
    /// Fingerprint or address of the verified signer.
    pub signer: String,
}

pub struct ImportOptions {
    pub trusted: TrustSet,
    /// Replace files that already exist in the target.
    pub overwrite: bool,
    /// Record per-file failures and keep going instead of aborting.
    pub partial: bool,
    pub passphrase: Option<SecretString>,
    /// Where to write the restore report, if anywhere.
    pub report_path: Option<PathBuf>,
}

impl ImportOptions {
    pub fn new(trusted: TrustSet) -> Self {
        Self {
            trusted,
            overwrite: false,
            partial: false,
            passphrase: None,
            report_path: None,
        }
    }
}

impl std::fmt::Debug for ImportOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportOptions")
            .field("trusted", &self.trusted.len())
            .field("overwrite", &self.overwrite)
            .field("partial", &self.partial)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .field("report_path", &self.report_path)
            .finish()
    }
}

pub struct ValidateOptions {
    pub trusted: TrustSet,
    /// Decrypt and check plaintext hashes of an encrypted capsule.
    pub passphrase: Option<SecretString>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationSummary {
    pub capsule_id: String,
    pub signer: String,
    pub blobs_checked: usize,
    /// Artifacts whose plaintext hash was verified; 0 when an encrypted
    /// capsule was validated without a passphrase.
    pub artifacts_checked: usize,
}

/// Decryption state rebuilt from the manifest `crypto` section.
struct Opener {
    master: MasterKey,
    aead: AeadAlgorithm,
}

/// A file that passed every check and is waiting to be written.
struct Pending<'a> {
    artifact: &'a ArtifactEntry,
    dest: PathBuf,
    existed: bool,
    data: Vec<u8>,
}

impl CapsuleEngine {
    /// Load and verify the manifest of `capsule_id` against `trusted`.
    pub async fn load_manifest(
        &self,
        capsule_id: &str,
        trusted: &TrustSet,
    ) -> CapsuleResult<VerifiedManifest> {
        let bytes = self.backend.get_document(capsule_id, MANIFEST_DOCUMENT).await?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| CapsuleError::SchemaInvalid(format!("manifest is not valid JSON: {e}")))?;

        match value.get("spec_version").and_then(Value::as_str) {
            Some(SPEC_VERSION) => {}
            other => {
                return Err(CapsuleError::SchemaInvalid(format!(
                    "unsupported spec_version: {}",
                    other.unwrap_or("<missing>")
                )))
            }
        }
        let signed = matches!(value.get("signature"), Some(Value::Object(map)) if !map.is_empty());
        if !signed {
            return Err(SignatureError::Missing.into());
        }

        self.schemas.validate(DocumentKind::Manifest, &value)?;
        let signer = verify_manifest(&value, trusted)?;

        let manifest: CapsuleManifest = serde_json::from_value(value)
            .map_err(|e| CapsuleError::SchemaInvalid(format!("manifest: {e}")))?;
        if manifest.capsule_id != capsule_id {
            return Err(CapsuleError::SignatureInvalid(format!(
                "manifest is signed for capsule {}, not {capsule_id}",
                manifest.capsule_id
            )));
        }
        check_references(&manifest)?;

        debug!(capsule_id, signer = %signer, artifacts = manifest.artifacts.len(), "manifest verified");
        Ok(VerifiedManifest { manifest, signer })
    }

    /// Fetch a blob and check its content hash.
    async fn fetch(&self, blob: &BlobEntry) -> CapsuleResult<Vec<u8>> {
        let data = match self.backend.get_blob(&blob.storage.locator).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => {
                return Err(CapsuleError::BlobInvalid(format!("blob {} is missing", blob.blob_id)))
            }
            Err(e) => return Err(e.into()),
        };
        let actual = content_hash(&data);
        if actual != blob.hash {
            return Err(CapsuleError::BlobInvalid(format!(
                "blob {} hash mismatch (stored bytes hash to {actual})",
                blob.blob_id
            )));
        }
        debug!(blob_id = %blob.blob_id, bytes = data.len(), "blob fetched");
        Ok(data)
    }

    /// Validate a stored capsule without writing anything locally.
    pub async fn validate(
        &self,
        capsule_id: &str,
        opts: &ValidateOptions,
    ) -> CapsuleResult<ValidationSummary> {
        let VerifiedManifest { manifest, signer } =
            self.load_manifest(capsule_id, &opts.trusted).await?;

        let mut stored = HashMap::with_capacity(manifest.blobs.len());
        for blob in &manifest.blobs {
            stored.insert(blob.blob_id.as_str(), self.fetch(blob).await?);
        }

        let opener = match (&manifest.crypto, &opts.passphrase) {
            (Some(_), None) => None,
            (_, passphrase) => Some(opener(&manifest, passphrase.as_ref())?),
        };

        let mut artifacts_checked = 0;
        if let Some(opener) = opener {
            if let Some(archive) = manifest.archive_blob() {
                let data = stored.remove(archive.blob_id.as_str()).unwrap_or_default();
                let plain = open(opener.as_ref(), archive, data)?;
                let files = read_archive(&plain, &artifact_paths(&manifest))
                    .map_err(|e| CapsuleError::BlobInvalid(format!("archive {}: {e}", archive.blob_id)))?;
                for artifact in &manifest.artifacts {
                    let data = files.get(&artifact.path).map(Vec::as_slice).unwrap_or_default();
                    check_plaintext(artifact, data)?;
                    artifacts_checked += 1;
                }
            } else {
                for artifact in &manifest.artifacts {
                    let blob = owning_blob(&manifest, artifact)?;
                    let data = stored.get(blob.blob_id.as_str()).cloned().unwrap_or_default();
                    let plain = open(opener.as_ref(), blob, data)?;
                    check_plaintext(artifact, &plain)?;
                    artifacts_checked += 1;
                }
            }
        } else {
            debug!(capsule_id, "encrypted capsule validated without passphrase; plaintext not checked");
        }

        info!(
            capsule_id,
            signer = %signer,
            blobs = manifest.blobs.len(),
            artifacts = artifacts_checked,
            "capsule valid"
        );
        Ok(ValidationSummary {
            capsule_id: capsule_id.to_string(),
            signer,
            blobs_checked: manifest.blobs.len(),
            artifacts_checked,
        })
    }

    /// Restore a capsule into `target` and return the restore report.
    pub async fn import(
        &self,
        capsule_id: &str,
        target: &Path,
        opts: &ImportOptions,
    ) -> CapsuleResult<RestoreReport> {
        let VerifiedManifest { manifest, .. } = self.load_manifest(capsule_id, &opts.trusted).await?;
        let opener = opener(&manifest, opts.passphrase.as_ref())?;

        tokio::fs::create_dir_all(target).await.map_err(|e| {
            CapsuleError::RestoreFailed(format!("creating {}: {e}", target.display()))
        })?;
        let root = target.canonicalize().map_err(|e| {
            CapsuleError::RestoreFailed(format!("resolving {}: {e}", target.display()))
        })?;

        let mut results = RestoreResults::default();
        let pending = if let Some(archive) = manifest.archive_blob() {
            self.load_archive(&manifest, archive, opener.as_ref(), &root, opts, &mut results)
                .await?
        } else {
            self.load_files(&manifest, opener.as_ref(), &root, opts, &mut results)
                .await?
        };

        for item in pending {
            let path = item.artifact.path.clone();
            match write_atomic(&item.dest, &item.data).await {
                Ok(()) => {
                    let restored = RestoredFile {
                        path,
                        size_bytes: item.data.len() as u64,
                        plaintext_hash: item.artifact.plaintext_hash.clone(),
                        reason: item.existed.then(|| REASON_OVERWRITE.to_string()),
                    };
                    if item.existed {
                        results.overwritten.push(restored);
                    } else {
                        results.created.push(restored);
                    }
                }
                Err(e) if opts.partial => {
                    warn!(path = %path, error = %e, "restore failed, continuing");
                    results.failed.push(FailedFile {
                        path,
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        let report = RestoreReport {
            spec_version: SPEC_VERSION.into(),
            schema_version: REPORT_SCHEMA_VERSION.into(),
            created_at: utc_now_rfc3339(),
            capsule_id: capsule_id.to_string(),
            target_workspace: root.display().to_string(),
            results,
        };
        let value = serde_json::to_value(&report).map_err(anyhow::Error::from)?;
        self.schemas.validate(DocumentKind::RestoreReport, &value)?;

        if let Some(path) = &opts.report_path {
            let bytes = document_bytes(&value).map_err(anyhow::Error::from)?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, bytes).await?;
            debug!(path = %path.display(), "restore report written");
        }

        info!(
            capsule_id,
            created = report.results.created.len(),
            overwritten = report.results.overwritten.len(),
            skipped = report.results.skipped.len(),
            failed = report.results.failed.len(),
            "capsule imported"
        );
        Ok(report)
    }

    /// Fetch, open and unpack the shared archive, then stage every artifact.
    async fn load_archive<'m>(
        &self,
        manifest: &'m CapsuleManifest,
        archive: &BlobEntry,
        opener: Option<&Opener>,
        root: &Path,
        opts: &ImportOptions,
        results: &mut RestoreResults,
    ) -> CapsuleResult<Vec<Pending<'m>>> {
        let stored = self.fetch(archive).await?;
        let plain = open(opener, archive, stored)?;
        let mut files = read_archive(&plain, &artifact_paths(manifest)).map_err(|e| {
            CapsuleError::RestoreFailed(format!("extracting archive {}: {e}", archive.blob_id))
        })?;

        let mut pending = Vec::new();
        for artifact in &manifest.artifacts {
            let dest = match resolve_target(root, &artifact.path) {
                Ok(dest) => dest,
                Err(e) if opts.partial => {
                    record_failure(results, artifact, &e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let existed = exists(&dest).await;
            if existed && !opts.overwrite {
                skip(results, artifact);
                continue;
            }

            let data = files.remove(&artifact.path).unwrap_or_default();
            // a mismatched archive member is never written
            if let Err(e) = check_plaintext(artifact, &data) {
                record_failure(results, artifact, &e);
                continue;
            }
            pending.push(Pending {
                artifact,
                dest,
                existed,
                data,
            });
        }
        Ok(pending)
    }

    /// Fetch, open and check one blob per artifact.
    ///
    /// Without `partial`, the first failure aborts before anything is written.
    async fn load_files<'m>(
        &self,
        manifest: &'m CapsuleManifest,
        opener: Option<&Opener>,
        root: &Path,
        opts: &ImportOptions,
        results: &mut RestoreResults,
    ) -> CapsuleResult<Vec<Pending<'m>>> {
        let mut cache: HashMap<&str, Vec<u8>> = HashMap::new();
        let mut pending = Vec::new();

        for artifact in &manifest.artifacts {
            let dest = match resolve_target(root, &artifact.path) {
                Ok(dest) => dest,
                Err(e) if opts.partial => {
                    record_failure(results, artifact, &e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let existed = exists(&dest).await;
            if existed && !opts.overwrite {
                skip(results, artifact);
                continue;
            }

            let loaded = async {
                let blob = owning_blob(manifest, artifact)?;
                let stored = match cache.get(blob.blob_id.as_str()) {
                    Some(data) => data.clone(),
                    None => {
                        let data = self.fetch(blob).await?;
                        cache.insert(blob.blob_id.as_str(), data.clone());
                        data
                    }
                };
                let plain = open(opener, blob, stored)?;
                check_plaintext(artifact, &plain)?;
                Ok::<_, CapsuleError>(plain)
            }
            .await;

            match loaded {
                Ok(data) => pending.push(Pending {
                    artifact,
                    dest,
                    existed,
                    data,
                }),
                Err(e) if opts.partial => record_failure(results, artifact, &e),
                Err(e) => return Err(e),
            }
        }
        Ok(pending)
    }
}

fn skip(results: &mut RestoreResults, artifact: &ArtifactEntry) {
    debug!(path = %artifact.path, "exists, skipping");
    results.skipped.push(SkippedFile {
        path: artifact.path.clone(),
        reason: REASON_EXISTS.into(),
    });
}

fn record_failure(results: &mut RestoreResults, artifact: &ArtifactEntry, error: &CapsuleError) {
    warn!(path = %artifact.path, error = %error, "artifact not restored");
    results.failed.push(FailedFile {
        path: artifact.path.clone(),
        error: error.to_string(),
    });
}

/// Every artifact must point at a blob in the manifest; blob hashes are unique.
fn check_references(manifest: &CapsuleManifest) -> CapsuleResult<()> {
    let mut hashes = HashSet::new();
    for blob in &manifest.blobs {
        if blob.blob_id != blob.hash {
            return Err(CapsuleError::SchemaInvalid(format!(
                "blob {} has hash {}",
                blob.blob_id, blob.hash
            )));
        }
        if !hashes.insert(blob.hash.as_str()) {
            return Err(CapsuleError::SchemaInvalid(format!("duplicate blob {}", blob.hash)));
        }
    }
    let mut paths = HashSet::new();
    for artifact in &manifest.artifacts {
        if !hashes.contains(artifact.blob_id.as_str()) {
            return Err(CapsuleError::SchemaInvalid(format!(
                "artifact {} references unknown blob {}",
                artifact.path, artifact.blob_id
            )));
        }
        if !paths.insert(artifact.path.as_str()) {
            return Err(CapsuleError::SchemaInvalid(format!("duplicate artifact {}", artifact.path)));
        }
    }
    if manifest.blobs.iter().filter(|b| b.is_archive).count() > 1 {
        return Err(CapsuleError::SchemaInvalid("more than one archive blob".into()));
    }
    Ok(())
}

fn owning_blob<'m>(manifest: &'m CapsuleManifest, artifact: &ArtifactEntry) -> CapsuleResult<&'m BlobEntry> {
    manifest.blob(&artifact.blob_id).ok_or_else(|| {
        CapsuleError::SchemaInvalid(format!("artifact {} references unknown blob", artifact.path))
    })
}

fn artifact_paths(manifest: &CapsuleManifest) -> BTreeSet<String> {
    manifest.artifacts.iter().map(|a| a.path.clone()).collect()
}

/// Rebuild the master key for an encrypted capsule; `None` for plaintext ones.
fn opener(manifest: &CapsuleManifest, passphrase: Option<&SecretString>) -> CapsuleResult<Option<Opener>> {
    let Some(info) = &manifest.crypto else {
        return Ok(None);
    };
    let passphrase = passphrase.ok_or_else(|| {
        CapsuleError::Config("capsule is encrypted; a passphrase is required".into())
    })?;
    if info.kdf != KDF_NAME
        || info.key_source != KEY_SOURCE
        || info.hkdf_info.as_bytes() != capsule_crypto::BLOB_HKDF_INFO
    {
        return Err(CapsuleError::Config(format!(
            "unsupported key scheme: {} / {} / {}",
            info.key_source, info.kdf, info.hkdf_info
        )));
    }
    let aead: AeadAlgorithm = info.aead.parse()?;
    let salt = b64url_decode(&info.kdf_params.salt)?;
    let params = KdfParams {
        mem_kib: info.kdf_params.mem_kib,
        iterations: info.kdf_params.iterations,
        parallelism: info.kdf_params.parallelism,
    };
    let master = derive_master_key(passphrase, &salt, &params)?;
    Ok(Some(Opener { master, aead }))
}

/// Stored bytes → plaintext.
fn open(opener: Option<&Opener>, blob: &BlobEntry, stored: Vec<u8>) -> CapsuleResult<Vec<u8>> {
    let Some(opener) = opener else {
        return Ok(stored);
    };
    let nonce = blob
        .nonce
        .as_deref()
        .ok_or_else(|| CapsuleError::DecryptFailed(format!("blob {} has no nonce", blob.blob_id)))?;
    let nonce = b64url_decode(nonce)
        .map_err(|e| CapsuleError::DecryptFailed(format!("blob {} nonce: {e}", blob.blob_id)))?;
    decrypt_blob(&opener.master, opener.aead, &nonce, &stored).map_err(|e| {
        CapsuleError::DecryptFailed(format!("blob {}: {e}", blob.blob_id))
    })
}

fn check_plaintext(artifact: &ArtifactEntry, data: &[u8]) -> CapsuleResult<()> {
    let actual = content_hash(data);
    if actual != artifact.plaintext_hash || data.len() as u64 != artifact.size_bytes {
        return Err(CapsuleError::BlobInvalid(format!(
            "{}: plaintext hash mismatch (got {actual}, {} bytes)",
            artifact.path,
            data.len()
        )));
    }
    Ok(())
}

/// `root/rel`, refusing unsafe paths and symlinked ancestors.
fn resolve_target(root: &Path, rel: &str) -> CapsuleResult<PathBuf> {
    validate_relpath(rel).map_err(|e| CapsuleError::RestoreFailed(format!("{rel}: {e}")))?;
    let mut dest = root.to_path_buf();
    for part in rel.split('/') {
        dest.push(part);
        if std::fs::symlink_metadata(&dest).is_ok_and(|m| m.file_type().is_symlink()) {
            return Err(CapsuleError::RestoreFailed(format!(
                "{rel}: refusing to write through symlink {}",
                dest.display()
            )));
        }
    }
    Ok(dest)
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Write through a sibling temp file and rename into place.
async fn write_atomic(dest: &Path, data: &[u8]) -> CapsuleResult<()> {
    let fail = |what: &str, e: std::io::Error| {
        CapsuleError::RestoreFailed(format!("{what} {}: {e}", dest.display()))
    };
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| fail("creating parent of", e))?;
    }
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dest.with_file_name(format!(".{name}.capsule-tmp"));
    tokio::fs::write(&tmp, data).await.map_err(|e| fail("writing", e))?;
    if let Err(e) = tokio::fs::rename(&tmp, dest).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(fail("renaming into", e));
    }
    Ok(())
}
