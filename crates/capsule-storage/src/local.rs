//! Local-directory backend.
//!
//! Layout under `root`:
//! ```text
//! capsules/{capsule_id}/blobs/{blob_id}
//! capsules/{capsule_id}/capsule.manifest.json
//! capsules/{capsule_id}/redaction.report.json
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use capsule_core::validate_relpath;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::backend::{blob_ref, document_path, StorageBackend, CAPSULES_DIR};
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone)]
pub struct LocalDirBackend {
    root: PathBuf,
}

impl LocalDirBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a validated relative ref onto the filesystem, refusing anything
    /// that resolves (through symlinks) outside the root.
    async fn resolve(&self, rel: &str) -> StorageResult<PathBuf> {
        validate_relpath(rel)?;
        let path = self.root.join(rel);
        match tokio::fs::canonicalize(&path).await {
            Ok(real) => {
                let root = tokio::fs::canonicalize(&self.root).await?;
                if !real.starts_with(&root) {
                    return Err(StorageError::InvalidRef(format!("path traversal detected: {rel}")));
                }
                Ok(real)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(rel.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, rel: &str) -> StorageResult<Vec<u8>> {
        let path = self.resolve(rel).await?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(rel.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `data` to a sibling temp file, fsync it, then rename over `target`.
/// Readers observe either the old file or the complete new one.
pub(crate) async fn atomic_write(target: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| std::io::Error::other(format!("no parent for {}", target.display())))?;
    tokio::fs::create_dir_all(dir).await?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, target).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

#[async_trait]
impl StorageBackend for LocalDirBackend {
    fn name(&self) -> &'static str {
        "local_dir"
    }

    async fn put_blob(&self, capsule_id: &str, blob_id: &str, data: &[u8]) -> StorageResult<String> {
        let rel = blob_ref(capsule_id, blob_id)?;
        atomic_write(&self.root.join(&rel), data).await?;
        debug!(backend = self.name(), blob_id, bytes = data.len(), "blob stored");
        Ok(rel)
    }

    async fn get_blob(&self, blob_ref: &str) -> StorageResult<Vec<u8>> {
        self.read(blob_ref).await
    }

    async fn has_blob(&self, blob_ref: &str) -> StorageResult<bool> {
        match self.resolve(blob_ref).await {
            Ok(path) => Ok(tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false)),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn put_document(&self, capsule_id: &str, name: &str, data: &[u8]) -> StorageResult<()> {
        let rel = document_path(capsule_id, name)?;
        atomic_write(&self.root.join(&rel), data).await?;
        debug!(backend = self.name(), capsule_id, document = name, bytes = data.len(), "document stored");
        Ok(())
    }

    async fn get_document(&self, capsule_id: &str, name: &str) -> StorageResult<Vec<u8>> {
        let rel = document_path(capsule_id, name)?;
        self.read(&rel).await
    }

    async fn list(&self, capsule_id: &str, prefix: &str) -> StorageResult<Vec<String>> {
        validate_relpath(capsule_id)?;
        let base = self.root.join(CAPSULES_DIR).join(capsule_id);
        let start = if prefix.is_empty() {
            base.clone()
        } else {
            validate_relpath(prefix.trim_end_matches('/'))?;
            base.join(prefix.trim_end_matches('/'))
        };
        if !tokio::fs::try_exists(&start).await? {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file() {
                    let name = entry.file_name();
                    if name.to_string_lossy().ends_with(".tmp") {
                        continue;
                    }
                    if let Ok(rel) = path.strip_prefix(&base) {
                        let parts: Vec<_> = rel
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect();
                        out.push(parts.join("/"));
                    }
                }
            }
        }
        out.sort();
        Ok(out)
    }
}
