//! The storage contract shared by every transport.

use async_trait::async_trait;
use capsule_core::validate_relpath;

use crate::error::{StorageError, StorageResult};

/// Top-level namespace under which every capsule lives.
pub const CAPSULES_DIR: &str = "capsules";

/// A content-addressed blob store plus named documents, scoped by capsule id.
///
/// Implementations must tolerate concurrent calls for different capsule ids
/// and for different blob ids within one capsule.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Static name recorded in manifest blob entries.
    fn name(&self) -> &'static str;

    /// Store `data` under `blob_id`; returns the opaque ref kept in the manifest.
    async fn put_blob(&self, capsule_id: &str, blob_id: &str, data: &[u8]) -> StorageResult<String>;

    async fn get_blob(&self, blob_ref: &str) -> StorageResult<Vec<u8>>;

    async fn has_blob(&self, blob_ref: &str) -> StorageResult<bool>;

    /// Create or replace a named document.
    async fn put_document(&self, capsule_id: &str, name: &str, data: &[u8]) -> StorageResult<()>;

    async fn get_document(&self, capsule_id: &str, name: &str) -> StorageResult<Vec<u8>>;

    /// Sorted paths under `prefix`, relative to the capsule directory.
    async fn list(&self, capsule_id: &str, prefix: &str) -> StorageResult<Vec<String>>;
}

/// `capsules/{capsule_id}/blobs/{blob_id}`
pub fn blob_ref(capsule_id: &str, blob_id: &str) -> StorageResult<String> {
    validate_relpath(capsule_id)?;
    validate_relpath(blob_id)?;
    if blob_id.contains('/') {
        return Err(StorageError::InvalidRef(format!("blob id contains '/': {blob_id}")));
    }
    Ok(format!("{CAPSULES_DIR}/{capsule_id}/blobs/{blob_id}"))
}

/// `capsules/{capsule_id}/{name}`
pub fn document_path(capsule_id: &str, name: &str) -> StorageResult<String> {
    validate_relpath(capsule_id)?;
    validate_relpath(name)?;
    Ok(format!("{CAPSULES_DIR}/{capsule_id}/{name}"))
}

/// Split a blob ref into `(capsule_id, blob_id)`.
///
/// Capsule ids may themselves contain a `/` (`{owner}/{uuid}`), so the blob
/// id is taken from the last `/blobs/` segment.
pub fn parse_blob_ref(blob_ref: &str) -> StorageResult<(&str, &str)> {
    validate_relpath(blob_ref)?;
    let rest = blob_ref
        .strip_prefix(CAPSULES_DIR)
        .and_then(|r| r.strip_prefix('/'))
        .ok_or_else(|| StorageError::InvalidRef(blob_ref.into()))?;
    let (capsule_id, blob_id) = rest
        .rsplit_once("/blobs/")
        .ok_or_else(|| StorageError::InvalidRef(blob_ref.into()))?;
    if capsule_id.is_empty() || blob_id.is_empty() || blob_id.contains('/') {
        return Err(StorageError::InvalidRef(blob_ref.into()));
    }
    Ok((capsule_id, blob_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_ref_layout() {
        assert_eq!(
            blob_ref("fp/0190", "abcd").unwrap(),
            "capsules/fp/0190/blobs/abcd"
        );
        assert_eq!(
            document_path("0190", "capsule.manifest.json").unwrap(),
            "capsules/0190/capsule.manifest.json"
        );
    }

    #[test]
    fn parse_handles_owner_prefixed_ids() {
        assert_eq!(
            parse_blob_ref("capsules/0xAb/0190/blobs/ff").unwrap(),
            ("0xAb/0190", "ff")
        );
        assert_eq!(parse_blob_ref("capsules/0190/blobs/ff").unwrap(), ("0190", "ff"));
    }

    #[test]
    fn rejects_traversal_and_foreign_refs() {
        assert!(blob_ref("../x", "ff").is_err());
        assert!(blob_ref("x", "a/b").is_err());
        assert!(parse_blob_ref("capsules/../../etc/blobs/passwd").is_err());
        assert!(parse_blob_ref("other/x/blobs/ff").is_err());
        assert!(parse_blob_ref("capsules/x/ff").is_err());
        assert!(parse_blob_ref("/capsules/x/blobs/ff").is_err());
    }
}
