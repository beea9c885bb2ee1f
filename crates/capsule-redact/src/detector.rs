//! Regex-based content detectors.

use capsule_core::types::{Classification, FindingLocation, Severity};
use regex::{Regex, RegexBuilder};
use serde_json::json;

use crate::error::{RedactError, RedactResult};

#[derive(Debug, Clone)]
pub struct DetectorRule {
    pub id: String,
    pub severity: Severity,
    pub class: Classification,
    pub patterns: Vec<String>,
    compiled: Vec<Regex>,
}

impl DetectorRule {
    pub fn new(
        id: impl Into<String>,
        severity: Severity,
        class: Classification,
        patterns: &[&str],
    ) -> RedactResult<Self> {
        let id = id.into();
        let compiled = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .multi_line(true)
                    .build()
                    .map_err(|e| RedactError::InvalidPattern {
                        rule_id: id.clone(),
                        message: e.to_string(),
                    })
            })
            .collect::<RedactResult<Vec<_>>>()?;
        Ok(Self {
            id,
            severity,
            class,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            compiled,
        })
    }

    /// 1-based line of every match, pattern by pattern. Never returns matched text.
    pub fn locate(&self, text: &str) -> Vec<FindingLocation> {
        let mut out = Vec::new();
        for re in &self.compiled {
            for m in re.find_iter(text) {
                let line = text[..m.start()].matches('\n').count() + 1;
                out.push(FindingLocation { line });
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct Detector {
    pub id: String,
    pub version: String,
    pub rules: Vec<DetectorRule>,
}

impl Detector {
    /// Rule configuration as hashed for audit.
    pub fn config(&self) -> serde_json::Value {
        json!({
            "rules": self.rules.iter().map(|r| json!({
                "id": r.id,
                "severity": r.severity,
                "class": r.class,
                "patterns": r.patterns,
            })).collect::<Vec<_>>()
        })
    }

    /// SHA-256 of the JCS-canonical rule configuration.
    pub fn config_hash(&self) -> RedactResult<String> {
        let bytes = capsule_crypto::canonicalize(&self.config())
            .map_err(|e| RedactError::ConfigHash(e.to_string()))?;
        Ok(capsule_crypto::content_hash(&bytes))
    }
}

/// `builtin-basic` v1.0.0: API keys, JWTs, PEM private keys, session fields.
pub fn builtin_detector() -> RedactResult<Detector> {
    Ok(Detector {
        id: "builtin-basic".into(),
        version: "1.0.0".into(),
        rules: vec![
            DetectorRule::new(
                "forbidden:api-key",
                Severity::High,
                Classification::Forbidden,
                &[
                    r"\bsk-[A-Za-z0-9]{16,}\b",
                    r"\bghp_[A-Za-z0-9]{20,}\b",
                    r"\bxox[baprs]-[A-Za-z0-9-]{10,}\b",
                    r"\bAIza[0-9A-Za-z\-_]{35}\b",
                ],
            )?,
            DetectorRule::new(
                "forbidden:jwt",
                Severity::High,
                Classification::Forbidden,
                &[r"\beyJ[A-Za-z0-9_-]*\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\b"],
            )?,
            DetectorRule::new(
                "forbidden:private-key-block",
                Severity::High,
                Classification::Forbidden,
                &[r"-----BEGIN [A-Z ]*PRIVATE KEY-----"],
            )?,
            DetectorRule::new(
                "sensitive:cookie-session",
                Severity::Medium,
                Classification::Sensitive,
                &[r#""(?:session|csrf|auth|token)"\s*:"#],
            )?,
        ],
    })
}
