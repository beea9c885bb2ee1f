//! Capsule data model: manifest, redaction report, restore report.
//!
//! These are the wire documents. Field names and nesting match the JSON
//! schemas shipped with `capsule-engine`; do not rename fields without a
//! schema version bump.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Protocol version tag carried by every document.
pub const SPEC_VERSION: &str = "v1";
pub const MANIFEST_SCHEMA_VERSION: &str = "2.0.0";
pub const REPORT_SCHEMA_VERSION: &str = "1.0.0";

pub const MANIFEST_DOCUMENT: &str = "capsule.manifest.json";
pub const REDACTION_REPORT_DOCUMENT: &str = "redaction.report.json";
pub const RESTORE_REPORT_DOCUMENT: &str = "restore.report.json";

/// Signing payload description recorded in every signature object.
pub const PAYLOAD_ALG: &str = "rfc8785_jcs_without_signature_utf8";

// ── Classification ───────────────────────────────────────────────────────────

/// Redaction classification. Ordered by priority so `max()` aggregates hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Public,
    Private,
    Sensitive,
    Forbidden,
}

impl Classification {
    pub const ALL: [Classification; 4] = [
        Classification::Public,
        Classification::Private,
        Classification::Sensitive,
        Classification::Forbidden,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Public => "public",
            Classification::Private => "private",
            Classification::Sensitive => "sensitive",
            Classification::Forbidden => "forbidden",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Exclude,
    IncludePlaintext,
    IncludeEncrypted,
    IncludeRedacted,
}

impl Decision {
    pub const ALL: [Decision; 4] = [
        Decision::Exclude,
        Decision::IncludeEncrypted,
        Decision::IncludeRedacted,
        Decision::IncludePlaintext,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Exclude => "exclude",
            Decision::IncludePlaintext => "include_plaintext",
            Decision::IncludeEncrypted => "include_encrypted",
            Decision::IncludeRedacted => "include_redacted",
        }
    }

    pub fn is_included(self) -> bool {
        self != Decision::Exclude
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Semantic kind of an artifact, derived purely from its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Memory,
    Persona,
    Ops,
    Project,
    Other,
}

impl ArtifactKind {
    pub fn for_path(rel_path: &str) -> Self {
        let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        if rel_path.starts_with("memory/") || rel_path == "MEMORY.md" {
            ArtifactKind::Memory
        } else if matches!(name, "SOUL.md" | "USER.md" | "IDENTITY.md") {
            ArtifactKind::Persona
        } else if matches!(name, "AGENTS.md" | "TOOLS.md" | "HEARTBEAT.md") {
            ArtifactKind::Ops
        } else if rel_path.starts_with("projects/") && rel_path.ends_with("STATUS.md") {
            ArtifactKind::Project
        } else {
            ArtifactKind::Other
        }
    }
}

// ── Manifest ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapsuleManifest {
    pub spec_version: String,
    pub schema_version: String,
    pub capsule_id: String,
    pub created_at: String,
    pub tool: ToolInfo,
    pub artifacts: Vec<ArtifactEntry>,
    pub blobs: Vec<BlobEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessControl>,
    pub redaction: RedactionRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto: Option<CryptoInfo>,
    /// Serialized as `{}` until signed.
    #[serde(default, with = "signature_field")]
    pub signature: Option<ManifestSignature>,
}

impl CapsuleManifest {
    pub fn blob(&self, blob_id: &str) -> Option<&BlobEntry> {
        self.blobs.iter().find(|b| b.blob_id == blob_id)
    }

    /// The shared archive blob, when artifacts were bundled.
    pub fn archive_blob(&self) -> Option<&BlobEntry> {
        self.blobs.iter().find(|b| b.is_archive)
    }

    pub fn is_compressed(&self) -> bool {
        self.compression.as_ref().is_some_and(|c| c.enabled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub path: String,
    pub kind: ArtifactKind,
    pub mode: Decision,
    pub plaintext_hash: String,
    pub size_bytes: u64,
    pub blob_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobEntry {
    pub blob_id: String,
    /// SHA-256 of the stored bytes (ciphertext when encrypted).
    pub hash: String,
    pub size_bytes: u64,
    pub storage: StorageRef,
    /// AEAD nonce, base64url without padding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_archive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRef {
    pub backend: String,
    #[serde(rename = "ref")]
    pub locator: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionInfo {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,
}

impl CompressionInfo {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            algorithm: None,
            level: None,
            original_size_bytes: None,
            compressed_size_bytes: None,
            compression_ratio: None,
        }
    }
}

/// Authorization metadata only; enforcement happens outside the capsule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    pub owner: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readers: Vec<String>,
    #[serde(default)]
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionRef {
    pub report_path: String,
    pub policy_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoInfo {
    pub aead: String,
    pub kdf: String,
    pub key_source: String,
    pub hkdf_info: String,
    pub kdf_params: KdfParamsInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParamsInfo {
    pub alg: String,
    /// base64url, no padding
    pub salt: String,
    pub mem_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub hash_len: u32,
}

/// A manifest signature object, tagged by `alg`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "alg")]
pub enum ManifestSignature {
    #[serde(rename = "ed25519")]
    Ed25519 {
        payload_alg: String,
        /// base64url raw 32-byte public key
        public_key: String,
        signer_fingerprint: String,
        /// base64url raw 64-byte signature
        sig: String,
    },
    #[serde(rename = "ecdsa_secp256k1_eip191")]
    Secp256k1Eip191 {
        payload_alg: String,
        signer_address: String,
        /// hex r || s || v
        sig: String,
    },
}

impl ManifestSignature {
    pub fn alg(&self) -> &'static str {
        match self {
            ManifestSignature::Ed25519 { .. } => "ed25519",
            ManifestSignature::Secp256k1Eip191 { .. } => "ecdsa_secp256k1_eip191",
        }
    }

    pub fn payload_alg(&self) -> &str {
        match self {
            ManifestSignature::Ed25519 { payload_alg, .. }
            | ManifestSignature::Secp256k1Eip191 { payload_alg, .. } => payload_alg,
        }
    }

    /// The declared signer identity (fingerprint or address).
    pub fn signer_identity(&self) -> &str {
        match self {
            ManifestSignature::Ed25519 {
                signer_fingerprint, ..
            } => signer_fingerprint,
            ManifestSignature::Secp256k1Eip191 { signer_address, .. } => signer_address,
        }
    }
}

mod signature_field {
    use super::ManifestSignature;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(
        sig: &Option<ManifestSignature>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match sig {
            Some(sig) => sig.serialize(serializer),
            None => serializer.serialize_map(Some(0))?.end(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<ManifestSignature>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match &value {
            Value::Null => Ok(None),
            Value::Object(map) if map.is_empty() => Ok(None),
            _ => serde_json::from_value(value)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

// ── Redaction report ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionReport {
    pub spec_version: String,
    pub schema_version: String,
    pub policy_version: String,
    pub created_at: String,
    pub capsule_id: String,
    pub detectors: Vec<DetectorEntry>,
    pub decisions: Vec<RedactionDecision>,
    pub findings: Vec<Finding>,
    pub findings_summary: FindingsSummary,
}

impl RedactionReport {
    pub fn included(&self) -> impl Iterator<Item = &RedactionDecision> {
        self.decisions.iter().filter(|d| d.decision.is_included())
    }

    pub fn has_forbidden(&self) -> bool {
        self.decisions
            .iter()
            .any(|d| d.classification == Classification::Forbidden)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorEntry {
    pub id: String,
    pub version: String,
    pub config_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionDecision {
    pub path: String,
    pub decision: Decision,
    #[serde(rename = "class")]
    pub classification: Classification,
    pub reasons: Vec<String>,
    pub detector_hits: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub path: String,
    pub rule_id: String,
    pub severity: Severity,
    pub locations: Vec<FindingLocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingLocation {
    /// 1-based
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingsSummary {
    pub total: usize,
    pub by_class: BTreeMap<String, usize>,
    pub by_decision: BTreeMap<String, usize>,
}

impl FindingsSummary {
    /// Count decisions by class and by decision. Every key is present.
    pub fn tally(decisions: &[RedactionDecision], findings: &[Finding]) -> Self {
        let mut by_class: BTreeMap<String, usize> = Classification::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), 0))
            .collect();
        let mut by_decision: BTreeMap<String, usize> = Decision::ALL
            .iter()
            .map(|d| (d.as_str().to_string(), 0))
            .collect();
        for d in decisions {
            *by_class.entry(d.classification.as_str().into()).or_default() += 1;
            *by_decision.entry(d.decision.as_str().into()).or_default() += 1;
        }
        Self {
            total: findings.len(),
            by_class,
            by_decision,
        }
    }
}

// ── Restore report ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    pub spec_version: String,
    pub schema_version: String,
    pub created_at: String,
    pub capsule_id: String,
    pub target_workspace: String,
    pub results: RestoreResults,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreResults {
    pub created: Vec<RestoredFile>,
    pub skipped: Vec<SkippedFile>,
    pub overwritten: Vec<RestoredFile>,
    pub failed: Vec<FailedFile>,
}

impl RestoreResults {
    pub fn total(&self) -> usize {
        self.created.len() + self.skipped.len() + self.overwritten.len() + self.failed.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoredFile {
    pub path: String,
    pub size_bytes: u64,
    pub plaintext_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedFile {
    pub path: String,
    pub error: String,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_manifest() -> CapsuleManifest {
        CapsuleManifest {
            spec_version: SPEC_VERSION.into(),
            schema_version: MANIFEST_SCHEMA_VERSION.into(),
            capsule_id: "0190f5c2-7a1e-7000-8000-000000000000".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            tool: ToolInfo {
                name: "capsule".into(),
                version: "0.3.0".into(),
            },
            artifacts: vec![],
            blobs: vec![],
            compression: Some(CompressionInfo::disabled()),
            access: None,
            redaction: RedactionRef {
                report_path: REDACTION_REPORT_DOCUMENT.into(),
                policy_version: "v1.0.0".into(),
            },
            crypto: None,
            signature: None,
        }
    }

    #[test]
    fn unsigned_manifest_serializes_empty_signature_object() {
        let value = serde_json::to_value(sample_manifest()).unwrap();
        assert_eq!(value["signature"], json!({}));
        assert_eq!(value["compression"], json!({"enabled": false}));
        assert!(value.get("crypto").is_none());
        assert!(value.get("access").is_none());
    }

    #[test]
    fn signature_object_is_tagged_by_alg() {
        let mut m = sample_manifest();
        m.signature = Some(ManifestSignature::Secp256k1Eip191 {
            payload_alg: PAYLOAD_ALG.into(),
            signer_address: "0x0000000000000000000000000000000000000001".into(),
            sig: "00".into(),
        });
        let value = serde_json::to_value(&m).unwrap();
        assert_eq!(value["signature"]["alg"], "ecdsa_secp256k1_eip191");

        let back: CapsuleManifest = serde_json::from_value(value).unwrap();
        assert_eq!(back.signature, m.signature);
        assert_eq!(
            back.signature.unwrap().signer_identity(),
            "0x0000000000000000000000000000000000000001"
        );
    }

    #[test]
    fn empty_signature_object_deserializes_to_none() {
        let value = serde_json::to_value(sample_manifest()).unwrap();
        let back: CapsuleManifest = serde_json::from_value(value).unwrap();
        assert!(back.signature.is_none());
    }

    #[test]
    fn blob_entry_omits_unset_optionals() {
        let blob = BlobEntry {
            blob_id: "ab".into(),
            hash: "ab".into(),
            size_bytes: 2,
            storage: StorageRef {
                backend: "local_dir".into(),
                locator: "capsules/x/blobs/ab".into(),
            },
            nonce: None,
            is_archive: false,
            archive_format: None,
        };
        let value = serde_json::to_value(&blob).unwrap();
        assert_eq!(value["storage"]["ref"], "capsules/x/blobs/ab");
        assert!(value.get("is_archive").is_none());
        assert!(value.get("nonce").is_none());
    }

    #[test]
    fn artifact_kind_from_path() {
        assert_eq!(ArtifactKind::for_path("MEMORY.md"), ArtifactKind::Memory);
        assert_eq!(ArtifactKind::for_path("memory/2026-01-01.md"), ArtifactKind::Memory);
        assert_eq!(ArtifactKind::for_path("SOUL.md"), ArtifactKind::Persona);
        assert_eq!(ArtifactKind::for_path("notes/USER.md"), ArtifactKind::Persona);
        assert_eq!(ArtifactKind::for_path("TOOLS.md"), ArtifactKind::Ops);
        assert_eq!(ArtifactKind::for_path("projects/alpha/STATUS.md"), ArtifactKind::Project);
        assert_eq!(ArtifactKind::for_path("STATUS.md"), ArtifactKind::Other);
        assert_eq!(ArtifactKind::for_path("README.md"), ArtifactKind::Other);
    }

    #[test]
    fn classification_priority_order() {
        let hits = [Classification::Sensitive, Classification::Forbidden, Classification::Public];
        assert_eq!(hits.iter().max(), Some(&Classification::Forbidden));
        assert!(Classification::Sensitive > Classification::Private);
        assert!(Classification::Private > Classification::Public);
    }

    #[test]
    fn findings_summary_includes_zero_counts() {
        let decisions = vec![RedactionDecision {
            path: ".env".into(),
            decision: Decision::Exclude,
            classification: Classification::Forbidden,
            reasons: vec!["denylist:.env".into()],
            detector_hits: vec![],
        }];
        let summary = FindingsSummary::tally(&decisions, &[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.by_class["forbidden"], 1);
        assert_eq!(summary.by_class["public"], 0);
        assert_eq!(summary.by_decision["exclude"], 1);
        assert_eq!(summary.by_decision["include_plaintext"], 0);
        assert_eq!(summary.by_decision.len(), 4);
    }

    #[test]
    fn decision_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(Decision::IncludeEncrypted).unwrap(),
            json!("include_encrypted")
        );
        assert!(!Decision::Exclude.is_included());
        assert!(Decision::IncludeRedacted.is_included());
    }
}
