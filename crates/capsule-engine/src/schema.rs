//! JSON Schema (Draft 2020-12) validation for the three capsule documents.
//!
//! The schema files ship with this crate and are embedded at build time;
//! [`SchemaSet::load_dir`] swaps in an externally maintained copy.

use std::fmt;
use std::path::Path;

use capsule_core::{CapsuleError, CapsuleResult};
use jsonschema::Validator;
use serde_json::Value;
use tracing::debug;

pub const MANIFEST_SCHEMA: &str = "capsule.manifest.schema.json";
pub const REDACTION_REPORT_SCHEMA: &str = "redaction.report.schema.json";
pub const RESTORE_REPORT_SCHEMA: &str = "restore.report.schema.json";

const EMBEDDED_MANIFEST: &str = include_str!("../schemas/capsule.manifest.schema.json");
const EMBEDDED_REDACTION_REPORT: &str = include_str!("../schemas/redaction.report.schema.json");
const EMBEDDED_RESTORE_REPORT: &str = include_str!("../schemas/restore.report.schema.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Manifest,
    RedactionReport,
    RestoreReport,
}

impl DocumentKind {
    pub fn schema_file(self) -> &'static str {
        match self {
            DocumentKind::Manifest => MANIFEST_SCHEMA,
            DocumentKind::RedactionReport => REDACTION_REPORT_SCHEMA,
            DocumentKind::RestoreReport => RESTORE_REPORT_SCHEMA,
        }
    }
}

/// A single schema violation.
#[derive(Debug, Clone)]
pub struct Violation {
    /// JSON pointer into the document ("" for the root).
    pub instance_path: String,
    pub schema_path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance_path.is_empty() {
            write!(f, "  (root): {}", self.message)
        } else {
            write!(f, "  {}: {}", self.instance_path, self.message)
        }
    }
}

/// Compiled validators for manifest, redaction report and restore report.
pub struct SchemaSet {
    manifest: Validator,
    redaction_report: Validator,
    restore_report: Validator,
}

impl fmt::Debug for SchemaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaSet").finish_non_exhaustive()
    }
}

impl SchemaSet {
    /// Validators for the schemas bundled with this crate.
    pub fn embedded() -> CapsuleResult<Self> {
        Ok(Self {
            manifest: compile(MANIFEST_SCHEMA, EMBEDDED_MANIFEST)?,
            redaction_report: compile(REDACTION_REPORT_SCHEMA, EMBEDDED_REDACTION_REPORT)?,
            restore_report: compile(RESTORE_REPORT_SCHEMA, EMBEDDED_RESTORE_REPORT)?,
        })
    }

    /// Load the three schema files by name from `dir`.
    pub fn load_dir(dir: &Path) -> CapsuleResult<Self> {
        let read = |name: &str| {
            std::fs::read_to_string(dir.join(name)).map_err(|e| {
                CapsuleError::Config(format!("reading schema {}: {e}", dir.join(name).display()))
            })
        };
        Ok(Self {
            manifest: compile(MANIFEST_SCHEMA, &read(MANIFEST_SCHEMA)?)?,
            redaction_report: compile(REDACTION_REPORT_SCHEMA, &read(REDACTION_REPORT_SCHEMA)?)?,
            restore_report: compile(RESTORE_REPORT_SCHEMA, &read(RESTORE_REPORT_SCHEMA)?)?,
        })
    }

    fn validator(&self, kind: DocumentKind) -> &Validator {
        match kind {
            DocumentKind::Manifest => &self.manifest,
            DocumentKind::RedactionReport => &self.redaction_report,
            DocumentKind::RestoreReport => &self.restore_report,
        }
    }

    /// Every violation of `instance` against the schema for `kind`.
    pub fn violations(&self, kind: DocumentKind, instance: &Value) -> Vec<Violation> {
        self.validator(kind)
            .iter_errors(instance)
            .map(|e| Violation {
                instance_path: e.instance_path.to_string(),
                schema_path: e.schema_path.to_string(),
                message: e.to_string(),
            })
            .collect()
    }

    /// Fail with [`CapsuleError::SchemaInvalid`] listing every violation.
    pub fn validate(&self, kind: DocumentKind, instance: &Value) -> CapsuleResult<()> {
        let violations = self.violations(kind, instance);
        if violations.is_empty() {
            debug!(schema = kind.schema_file(), "document valid");
            return Ok(());
        }
        let lines: Vec<String> = violations.iter().map(ToString::to_string).collect();
        Err(CapsuleError::SchemaInvalid(format!(
            "{} ({} violation{}):\n{}",
            kind.schema_file(),
            violations.len(),
            if violations.len() == 1 { "" } else { "s" },
            lines.join("\n")
        )))
    }
}

fn compile(name: &str, text: &str) -> CapsuleResult<Validator> {
    let schema: Value = serde_json::from_str(text)
        .map_err(|e| CapsuleError::Config(format!("schema {name} is not valid JSON: {e}")))?;
    let mut opts = jsonschema::options();
    opts.with_draft(jsonschema::Draft::Draft202012);
    opts.build(&schema)
        .map_err(|e| CapsuleError::Config(format!("schema {name} failed to compile: {e}")))
}
