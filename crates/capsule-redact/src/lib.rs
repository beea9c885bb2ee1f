//! capsule-redact: the privacy gate in front of every export
//!
//! Walks a workspace, classifies each file with allow/deny globs and regex
//! detectors, and produces a [`RedactionReport`](capsule_core::types::RedactionReport)
//! that never contains matched content.

pub mod detector;
pub mod error;
pub mod pattern;
pub mod policy;
pub mod walk;

pub use detector::{builtin_detector, Detector, DetectorRule};
pub use error::{RedactError, RedactResult};
pub use pattern::PathGlob;
pub use policy::{default_allowlist, default_denylist, RedactionPolicy, WorkspaceScan};
pub use walk::workspace_files;
