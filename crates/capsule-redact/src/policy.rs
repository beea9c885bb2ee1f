//! Per-file classification and the redaction report.
//!
//! Decision order per file, first match wins:
//! 1. denylist glob          → forbidden
//! 2. larger than size limit → forbidden
//! 3. not allowlisted        → private, excluded
//! 4. detector scan          → highest class among matched rules
//!
//! Forbidden files are excluded unless `allow_forbidden`; sensitive files are
//! excluded unless `include_sensitive`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use capsule_core::config::PolicyConfig;
use capsule_core::types::{
    Classification, Decision, DetectorEntry, Finding, FindingsSummary, RedactionDecision,
    RedactionReport, REPORT_SCHEMA_VERSION, SPEC_VERSION,
};
use capsule_core::{normalize_relpath, utc_now_rfc3339};
use tracing::{debug, info, warn};

use crate::detector::{builtin_detector, Detector};
use crate::error::RedactResult;
use crate::pattern::{compile_all, PathGlob};
use crate::walk::workspace_files;

pub const DEFAULT_POLICY_VERSION: &str = "v1.0.0";
pub const DEFAULT_SIZE_LIMIT_BYTES: u64 = 10 * 1024 * 1024;

/// A redaction report plus where each reported path lives on disk.
///
/// Report paths are NFC-normalized; `sources` maps them back to the names the
/// filesystem actually holds, which may differ (e.g. NFD on some volumes).
#[derive(Debug, Clone)]
pub struct WorkspaceScan {
    pub report: RedactionReport,
    pub sources: BTreeMap<String, PathBuf>,
}

pub fn default_allowlist() -> Vec<&'static str> {
    vec![
        "MEMORY.md",
        "memory/**/*.md",
        "memory/**/*.json",
        "memory/*.md",
        "memory/*.json",
        "SOUL.md",
        "USER.md",
        "IDENTITY.md",
        "AGENTS.md",
        "TOOLS.md",
        "HEARTBEAT.md",
        "projects/**/STATUS.md",
    ]
}

pub fn default_denylist() -> Vec<&'static str> {
    vec![
        ".env",
        "**/.env",
        "**/*.pem",
        "**/*id_rsa*",
        "**/*private_key*",
        "**/*token*",
        "**/*secret*",
        "**/*cookies*.json",
        "**/*_cookies.json",
        "memory/moltbook.json",
        "**/Cookies",
        "**/cookies.sqlite",
        "**/cookies.db",
        "**/Login Data",
        "**/Web Data",
        "**/Local State",
        "**/Sessions/*",
        "**/Session Storage/*",
        "**/Local Storage/*",
    ]
}

#[derive(Debug, Clone)]
pub struct RedactionPolicy {
    pub allowlist: Vec<PathGlob>,
    pub denylist: Vec<PathGlob>,
    pub detectors: Vec<Detector>,
    pub policy_version: String,
    /// 0 disables the size check
    pub size_limit_bytes: u64,
    pub include_sensitive: bool,
    pub allow_forbidden: bool,
    /// Decision recorded for files that pass the policy.
    pub included_as: Decision,
}

impl RedactionPolicy {
    /// Default workspace policy with the built-in detector.
    pub fn workspace_default() -> RedactResult<Self> {
        Ok(Self {
            allowlist: compile_all(&default_allowlist())?,
            denylist: compile_all(&default_denylist())?,
            detectors: vec![builtin_detector()?],
            policy_version: DEFAULT_POLICY_VERSION.into(),
            size_limit_bytes: DEFAULT_SIZE_LIMIT_BYTES,
            include_sensitive: false,
            allow_forbidden: false,
            included_as: Decision::IncludeEncrypted,
        })
    }

    /// Defaults plus the `[policy]` overrides; extra globs are appended.
    pub fn from_config(cfg: &PolicyConfig) -> RedactResult<Self> {
        let mut policy = Self::workspace_default()?;
        policy.allowlist.extend(compile_all(&cfg.extra_allowlist)?);
        policy.denylist.extend(compile_all(&cfg.extra_denylist)?);
        policy.policy_version = cfg.policy_version.clone();
        policy.size_limit_bytes = cfg.size_limit_bytes;
        policy.include_sensitive = cfg.include_sensitive;
        policy.allow_forbidden = cfg.allow_forbidden;
        Ok(policy)
    }

    pub fn with_included_as(mut self, decision: Decision) -> Self {
        self.included_as = decision;
        self
    }

    fn forbidden_decision(&self) -> Decision {
        if self.allow_forbidden {
            self.included_as
        } else {
            Decision::Exclude
        }
    }

    fn decide(&self, class: Classification) -> Decision {
        match class {
            Classification::Forbidden => self.forbidden_decision(),
            Classification::Sensitive if !self.include_sensitive => Decision::Exclude,
            _ => self.included_as,
        }
    }

    fn denied_by(&self, rel_path: &str) -> Option<&PathGlob> {
        self.denylist.iter().find(|g| g.matches(rel_path))
    }

    fn allowed(&self, rel_path: &str) -> bool {
        self.allowlist.iter().any(|g| g.matches(rel_path))
    }

    /// Classify one allowlisted file by content.
    fn scan_file(&self, path: &Path, rel_path: &str) -> (Vec<String>, Classification, Vec<Finding>) {
        let text = match std::fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(path = rel_path, error = %e, "unreadable file, skipping detectors");
                return (Vec::new(), Classification::Public, Vec::new());
            }
        };

        let mut hits = Vec::new();
        let mut class = Classification::Public;
        let mut findings = Vec::new();
        for detector in &self.detectors {
            for rule in &detector.rules {
                let locations = rule.locate(&text);
                if locations.is_empty() {
                    continue;
                }
                hits.push(rule.id.clone());
                class = class.max(rule.class);
                findings.push(Finding {
                    path: rel_path.to_string(),
                    rule_id: rule.id.clone(),
                    severity: rule.severity,
                    locations,
                });
            }
        }
        (hits, class, findings)
    }

    /// Scan `root` and build the redaction report for `capsule_id`.
    ///
    /// Reports carry paths, rule ids and line numbers only, never file content.
    pub fn scan_workspace(&self, root: &Path, capsule_id: &str) -> RedactResult<RedactionReport> {
        self.scan(root, capsule_id).map(|scan| scan.report)
    }

    /// Like [`scan_workspace`](Self::scan_workspace), keeping the on-disk path
    /// of every scanned file.
    pub fn scan(&self, root: &Path, capsule_id: &str) -> RedactResult<WorkspaceScan> {
        let detectors = self
            .detectors
            .iter()
            .map(|d| {
                Ok(DetectorEntry {
                    id: d.id.clone(),
                    version: d.version.clone(),
                    config_hash: d.config_hash()?,
                })
            })
            .collect::<RedactResult<Vec<_>>>()?;

        let mut decisions = Vec::new();
        let mut findings = Vec::new();
        let mut sources = BTreeMap::new();

        for path in workspace_files(root)? {
            let rel_path = normalize_relpath(&path, root)?;
            let size = std::fs::metadata(&path)?.len();
            sources.insert(rel_path.clone(), path.clone());

            if let Some(glob) = self.denied_by(&rel_path) {
                decisions.push(RedactionDecision {
                    path: rel_path,
                    decision: self.forbidden_decision(),
                    classification: Classification::Forbidden,
                    reasons: vec![format!("denylist:{}", glob.as_str())],
                    detector_hits: Vec::new(),
                });
                continue;
            }

            if self.size_limit_bytes > 0 && size > self.size_limit_bytes {
                decisions.push(RedactionDecision {
                    path: rel_path,
                    decision: self.forbidden_decision(),
                    classification: Classification::Forbidden,
                    reasons: vec!["size_limit".into()],
                    detector_hits: Vec::new(),
                });
                continue;
            }

            if !self.allowed(&rel_path) {
                decisions.push(RedactionDecision {
                    path: rel_path,
                    decision: Decision::Exclude,
                    classification: Classification::Private,
                    reasons: vec!["not_allowlisted".into()],
                    detector_hits: Vec::new(),
                });
                continue;
            }

            let (hits, class, file_findings) = self.scan_file(&path, &rel_path);
            findings.extend(file_findings);
            let mut reasons = vec!["allowlist".to_string()];
            reasons.extend(hits.iter().cloned());
            debug!(path = %rel_path, class = %class, hits = hits.len(), "classified");
            decisions.push(RedactionDecision {
                path: rel_path,
                decision: self.decide(class),
                classification: class,
                reasons,
                detector_hits: hits,
            });
        }

        let findings_summary = FindingsSummary::tally(&decisions, &findings);
        info!(
            capsule_id,
            files = decisions.len(),
            included = decisions.iter().filter(|d| d.decision.is_included()).count(),
            findings = findings_summary.total,
            "workspace scanned"
        );

        let report = RedactionReport {
            spec_version: SPEC_VERSION.into(),
            schema_version: REPORT_SCHEMA_VERSION.into(),
            policy_version: self.policy_version.clone(),
            created_at: utc_now_rfc3339(),
            capsule_id: capsule_id.to_string(),
            detectors,
            decisions,
            findings,
            findings_summary,
        };
        Ok(WorkspaceScan { report, sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RedactionPolicy {
        RedactionPolicy::workspace_default().unwrap()
    }

    #[test]
    fn decision_mapping_respects_flags() {
        let mut p = policy();
        assert_eq!(p.decide(Classification::Public), Decision::IncludeEncrypted);
        assert_eq!(p.decide(Classification::Sensitive), Decision::Exclude);
        assert_eq!(p.decide(Classification::Forbidden), Decision::Exclude);

        p.include_sensitive = true;
        p.allow_forbidden = true;
        p = p.with_included_as(Decision::IncludePlaintext);
        assert_eq!(p.decide(Classification::Sensitive), Decision::IncludePlaintext);
        assert_eq!(p.decide(Classification::Forbidden), Decision::IncludePlaintext);
    }

    #[test]
    fn config_overrides_are_applied() {
        let cfg = PolicyConfig {
            policy_version: "v2".into(),
            size_limit_bytes: 5,
            extra_allowlist: vec!["notes/*.txt".into()],
            extra_denylist: vec!["**/*.bak".into()],
            ..Default::default()
        };
        let p = RedactionPolicy::from_config(&cfg).unwrap();
        assert_eq!(p.policy_version, "v2");
        assert!(p.allowed("notes/a.txt"));
        assert_eq!(p.denied_by("x/y.bak").map(PathGlob::as_str), Some("**/*.bak"));
    }

    #[test]
    fn invalid_config_glob_is_error() {
        let cfg = PolicyConfig {
            extra_denylist: vec!["[".into()],
            ..Default::default()
        };
        assert!(RedactionPolicy::from_config(&cfg).is_err());
    }

    #[test]
    fn default_lists_cover_expected_paths() {
        let p = policy();
        for allowed in ["MEMORY.md", "memory/2024-01-01.md", "memory/a/b.json", "projects/x/STATUS.md"] {
            assert!(p.allowed(allowed), "{allowed}");
        }
        for denied in [".env", "app/.env", "keys/server.pem", "github_token.txt", "memory/moltbook.json"] {
            assert!(p.denied_by(denied).is_some(), "{denied}");
        }
        assert!(!p.allowed("notes.txt"));
    }
}
