//! Presigned-URL backend fronted by an external credential service.
//!
//! ```text
//! client ──sign("{capsule_id}:{action}:{ts}")──► POST {service}/presign
//!        ◄── {urls: {manifest, redaction_report, blobs}, expires_at}
//! client ──PUT/GET──► object storage (directly, via the returned URLs)
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capsule_crypto::ManifestSigner;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{blob_ref, parse_blob_ref, StorageBackend};
use crate::error::{StorageError, StorageResult};
use crate::url_cache::{unix_now, MemoryUrlCache, PresignedUrls, UrlCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignAction {
    Read,
    Write,
}

impl PresignAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PresignAction::Read => "read",
            PresignAction::Write => "write",
        }
    }
}

#[derive(Debug, Serialize)]
struct PresignRequest<'a> {
    capsule_id: &'a str,
    action: &'a str,
    timestamp: i64,
    signature: String,
    address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    blobs: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct PresignResponse {
    #[serde(default)]
    urls: PresignedUrls,
    expires_at: i64,
}

pub struct PresignedUrlBackend {
    service_url: String,
    signer: Arc<dyn ManifestSigner>,
    client: reqwest::Client,
    cache: Arc<dyn UrlCache>,
}

impl PresignedUrlBackend {
    pub fn new(
        service_url: impl Into<String>,
        signer: Arc<dyn ManifestSigner>,
        timeout: Duration,
    ) -> StorageResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            service_url: service_url.into().trim_end_matches('/').to_string(),
            signer,
            client,
            cache: Arc::new(MemoryUrlCache::default()),
        })
    }

    /// Keep the in-memory cache but treat URLs as expired `buffer` before
    /// their reported expiry.
    pub fn with_url_buffer(self, buffer: Duration) -> Self {
        self.with_cache(Arc::new(MemoryUrlCache::new(buffer)))
    }

    /// Replace the default in-memory cache (e.g. with a shared directory cache).
    pub fn with_cache(mut self, cache: Arc<dyn UrlCache>) -> Self {
        self.cache = cache;
        self
    }

    async fn request_urls(
        &self,
        capsule_id: &str,
        action: PresignAction,
        blobs: Option<Vec<String>>,
    ) -> StorageResult<PresignResponse> {
        let timestamp = unix_now();
        let message = format!("{capsule_id}:{}:{timestamp}", action.as_str());
        let signature = self
            .signer
            .sign_message(message.as_bytes())
            .map_err(|e| StorageError::Http(format!("signing presign request: {e}")))?;

        let body = PresignRequest {
            capsule_id,
            action: action.as_str(),
            timestamp,
            signature,
            address: self.signer.identity(),
            blobs,
        };

        let resp = self
            .client
            .post(format!("{}/presign", self.service_url))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let text = resp.text().await.unwrap_or_default();
            return Err(StorageError::Http(format!(
                "credential service error: {status} - {text}"
            )));
        }
        Ok(resp.json().await?)
    }

    async fn urls(
        &self,
        capsule_id: &str,
        action: PresignAction,
        blobs: Option<Vec<String>>,
    ) -> StorageResult<PresignedUrls> {
        let cache_key = format!("{capsule_id}:read");
        if action == PresignAction::Read {
            if let Some(urls) = self.cache.get(&cache_key) {
                debug!(capsule_id, "presigned URL cache hit");
                return Ok(urls);
            }
            debug!(capsule_id, "presigned URL cache miss");
        }

        let resp = self.request_urls(capsule_id, action, blobs).await?;
        if action == PresignAction::Read {
            self.cache.put(&cache_key, &resp.urls, resp.expires_at);
        }
        info!(capsule_id, action = action.as_str(), expires_at = resp.expires_at, "presigned URLs issued");
        Ok(resp.urls)
    }

    async fn upload(&self, url: &str, data: &[u8], content_type: &str) -> StorageResult<()> {
        let resp = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data.to_vec())
            .send()
            .await?;
        match resp.status().as_u16() {
            200 | 201 => Ok(()),
            code => Err(StorageError::Http(format!("upload failed: {code}"))),
        }
    }

    async fn download(&self, url: &str) -> StorageResult<Vec<u8>> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait]
impl StorageBackend for PresignedUrlBackend {
    fn name(&self) -> &'static str {
        "presigned_url"
    }

    async fn put_blob(&self, capsule_id: &str, blob_id: &str, data: &[u8]) -> StorageResult<String> {
        let r = blob_ref(capsule_id, blob_id)?;
        let urls = self
            .urls(capsule_id, PresignAction::Write, Some(vec![blob_id.to_string()]))
            .await?;
        let url = urls
            .blobs
            .get(blob_id)
            .ok_or_else(|| StorageError::Http(format!("no presigned URL for blob: {blob_id}")))?;
        self.upload(url, data, "application/octet-stream").await?;
        debug!(backend = self.name(), blob_id, bytes = data.len(), "blob stored");
        Ok(r)
    }

    async fn get_blob(&self, blob_ref: &str) -> StorageResult<Vec<u8>> {
        let (capsule_id, blob_id) = parse_blob_ref(blob_ref)?;
        let urls = self.urls(capsule_id, PresignAction::Read, None).await?;
        let url = urls
            .blobs
            .get(blob_id)
            .ok_or_else(|| StorageError::NotFound(format!("no presigned URL for blob: {blob_id}")))?;
        self.download(url).await
    }

    async fn has_blob(&self, blob_ref: &str) -> StorageResult<bool> {
        let Ok((capsule_id, blob_id)) = parse_blob_ref(blob_ref) else {
            return Ok(false);
        };
        let urls = self.urls(capsule_id, PresignAction::Read, None).await?;
        Ok(urls.blobs.contains_key(blob_id))
    }

    async fn put_document(&self, capsule_id: &str, name: &str, data: &[u8]) -> StorageResult<()> {
        let urls = self
            .urls(capsule_id, PresignAction::Write, Some(Vec::new()))
            .await?;
        let url = urls
            .document(name)
            .ok_or_else(|| StorageError::Http(format!("no presigned URL for document: {name}")))?;
        self.upload(url, data, "application/json").await?;
        debug!(backend = self.name(), capsule_id, document = name, bytes = data.len(), "document stored");
        Ok(())
    }

    async fn get_document(&self, capsule_id: &str, name: &str) -> StorageResult<Vec<u8>> {
        let urls = self.urls(capsule_id, PresignAction::Read, None).await?;
        let url = urls
            .document(name)
            .ok_or_else(|| StorageError::NotFound(format!("no presigned URL for document: {name}")))?;
        self.download(url).await
    }

    async fn list(&self, capsule_id: &str, prefix: &str) -> StorageResult<Vec<String>> {
        if !(prefix.is_empty() || prefix.starts_with("blobs")) {
            return Ok(Vec::new());
        }
        let urls = self.urls(capsule_id, PresignAction::Read, None).await?;
        // BTreeMap keys are already sorted
        Ok(urls.blobs.keys().map(|id| format!("blobs/{id}")).collect())
    }
}
