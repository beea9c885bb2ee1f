//! S3-compatible object-store backend on top of an OpenDAL operator.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use capsule_core::validate_relpath;
use opendal::Operator;
use tracing::{debug, warn};

use crate::backend::{blob_ref, document_path, StorageBackend, CAPSULES_DIR};
use crate::error::{StorageError, StorageResult};

/// Minimal config needed to build an S3 operator
/// (full config lives in capsule-core's StorageConfig)
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub prefix: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Build an OpenDAL Operator for S3 (or any S3-compatible endpoint).
///
/// Path-style addressing is the opendal default, which MinIO-style endpoints need.
/// `prefix` becomes the operator root, so refs stay prefix-free.
pub fn build_operator(cfg: &S3Settings) -> Result<Operator> {
    let mut builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&cfg.access_key_id)
        .secret_access_key(&cfg.secret_access_key);
    let prefix = cfg.prefix.trim_matches('/');
    if !prefix.is_empty() {
        builder = builder.root(&format!("/{prefix}"));
    }

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// Build an operator from capsule-core config + loaded credentials.
///
/// If `enforce_tls` is true and the endpoint uses HTTP, this returns an error.
/// Otherwise, a warning is logged for non-HTTPS endpoints.
pub fn build_from_core_config(
    storage: &capsule_core::config::StorageConfig,
    access_key_id: &str,
    secret_access_key: &str,
) -> Result<Operator> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP, credentials are transmitted unencrypted"
        );
    }

    build_operator(&S3Settings {
        endpoint: storage.endpoint.clone(),
        region: storage.region.clone(),
        bucket: storage.bucket.clone(),
        prefix: storage.prefix.clone(),
        access_key_id: access_key_id.to_string(),
        secret_access_key: secret_access_key.to_string(),
    })
}

/// Object-store backend. Every write is followed by a bounded existence check
/// for eventually consistent stores.
#[derive(Clone)]
pub struct ObjectStoreBackend {
    op: Operator,
    read_after_write_retries: u32,
    read_after_write_delay: Duration,
}

impl ObjectStoreBackend {
    pub fn new(op: Operator) -> Self {
        Self {
            op,
            read_after_write_retries: 3,
            read_after_write_delay: Duration::from_millis(500),
        }
    }

    pub fn with_read_after_write(mut self, retries: u32, delay: Duration) -> Self {
        self.read_after_write_retries = retries;
        self.read_after_write_delay = delay;
        self
    }

    async fn write_checked(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.op.write(key, data.to_vec()).await?;
        for attempt in 1..=self.read_after_write_retries {
            match self.op.exists(key).await {
                Ok(true) => return Ok(()),
                Ok(false) => debug!(key, attempt, "object not yet visible"),
                Err(e) => debug!(key, attempt, error = %e, "existence check failed"),
            }
            tokio::time::sleep(self.read_after_write_delay).await;
        }
        Err(StorageError::Backend(format!("read-after-write check failed for key: {key}")))
    }

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        validate_relpath(key)?;
        let buf = self.op.read(key).await?;
        Ok(buf.to_vec())
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn put_blob(&self, capsule_id: &str, blob_id: &str, data: &[u8]) -> StorageResult<String> {
        let key = blob_ref(capsule_id, blob_id)?;
        self.write_checked(&key, data).await?;
        debug!(backend = self.name(), blob_id, bytes = data.len(), "blob stored");
        Ok(key)
    }

    async fn get_blob(&self, blob_ref: &str) -> StorageResult<Vec<u8>> {
        self.read(blob_ref).await
    }

    async fn has_blob(&self, blob_ref: &str) -> StorageResult<bool> {
        validate_relpath(blob_ref)?;
        Ok(self.op.exists(blob_ref).await?)
    }

    async fn put_document(&self, capsule_id: &str, name: &str, data: &[u8]) -> StorageResult<()> {
        let key = document_path(capsule_id, name)?;
        self.write_checked(&key, data).await?;
        debug!(backend = self.name(), capsule_id, document = name, bytes = data.len(), "document stored");
        Ok(())
    }

    async fn get_document(&self, capsule_id: &str, name: &str) -> StorageResult<Vec<u8>> {
        let key = document_path(capsule_id, name)?;
        self.read(&key).await
    }

    async fn list(&self, capsule_id: &str, prefix: &str) -> StorageResult<Vec<String>> {
        validate_relpath(capsule_id)?;
        let base = format!("{CAPSULES_DIR}/{capsule_id}/");
        let prefix = prefix.trim_matches('/');
        let dir = if prefix.is_empty() {
            base.clone()
        } else {
            validate_relpath(prefix)?;
            format!("{base}{prefix}/")
        };

        let entries = match self.op.list_with(&dir).recursive(true).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out: Vec<String> = entries
            .into_iter()
            .filter(|e| e.metadata().mode().is_file())
            .filter_map(|e| e.path().trim_start_matches('/').strip_prefix(&base).map(str::to_string))
            .collect();
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_backend() -> ObjectStoreBackend {
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        ObjectStoreBackend::new(op).with_read_after_write(3, Duration::from_millis(1))
    }

    #[test]
    fn test_build_operator_valid() {
        let cfg = S3Settings {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            bucket: "capsules".to_string(),
            prefix: "team-a".to_string(),
            access_key_id: "test-key".to_string(),
            secret_access_key: "test-secret".to_string(),
        };
        assert!(build_operator(&cfg).is_ok());
    }

    #[test]
    fn test_build_from_core_config_http_enforce_tls() {
        let storage = capsule_core::config::StorageConfig {
            endpoint: "http://insecure:9000".into(),
            enforce_tls: true,
            ..Default::default()
        };
        let err = build_from_core_config(&storage, "key", "secret").unwrap_err();
        assert!(err.to_string().contains("enforce_tls"));
    }

    #[test]
    fn test_build_from_core_config_https() {
        let storage = capsule_core::config::StorageConfig {
            endpoint: "https://s3.example.com".into(),
            enforce_tls: true,
            ..Default::default()
        };
        assert!(build_from_core_config(&storage, "key", "secret").is_ok());
    }

    #[tokio::test]
    async fn blob_and_document_roundtrip() {
        let backend = memory_backend();
        let r = backend.put_blob("fp/0190", "ab", b"bytes").await.unwrap();
        assert_eq!(r, "capsules/fp/0190/blobs/ab");
        assert!(backend.has_blob(&r).await.unwrap());
        assert_eq!(backend.get_blob(&r).await.unwrap(), b"bytes");

        backend.put_document("fp/0190", "capsule.manifest.json", b"{}").await.unwrap();
        assert_eq!(
            backend.get_document("fp/0190", "capsule.manifest.json").await.unwrap(),
            b"{}"
        );
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let backend = memory_backend();
        assert!(!backend.has_blob("capsules/x/blobs/zz").await.unwrap());
        let err = backend.get_blob("capsules/x/blobs/zz").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_is_relative_and_sorted() {
        let backend = memory_backend();
        backend.put_blob("c", "bb", b"2").await.unwrap();
        backend.put_blob("c", "aa", b"1").await.unwrap();
        backend.put_document("c", "redaction.report.json", b"{}").await.unwrap();
        assert_eq!(backend.list("c", "blobs").await.unwrap(), vec!["blobs/aa", "blobs/bb"]);
        assert!(backend.list("other", "blobs").await.unwrap().is_empty());
    }
}
