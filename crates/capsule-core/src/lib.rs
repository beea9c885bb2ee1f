//! capsule-core: shared data model, config schema, and error taxonomy

pub mod config;
pub mod error;
pub mod ids;
pub mod json;
pub mod paths;
pub mod types;

pub use error::{CapsuleError, CapsuleResult, ErrorKind};
pub use ids::{new_capsule_id, utc_now_rfc3339};
pub use json::document_bytes;
pub use paths::{normalize_relpath, validate_relpath, PathError};
