//! capsule-engine: the capsule pipeline
//!
//! ```text
//! export:   workspace ─scan─▶ report ─▶ blobs ─▶ manifest ─sign─▶ schema ─▶ backend
//! validate: backend ─▶ manifest ─schema─▶ verify ─▶ blob hashes ─▶ plaintext hashes
//! import:   validate checks ─▶ write files (overwrite / partial) ─▶ restore report
//! ```

pub mod archive;
pub mod engine;
pub mod export;
pub mod restore;
pub mod schema;

pub use engine::CapsuleEngine;
pub use export::{EncryptionOptions, ExportOptions, ExportOutcome};
pub use restore::{ImportOptions, ValidateOptions, ValidationSummary, VerifiedManifest};
pub use schema::{DocumentKind, SchemaSet, Violation};
