//! Backend selection from `[storage]` config.

use std::sync::Arc;
use std::time::Duration;

use capsule_core::config::StorageConfig;
use capsule_core::{CapsuleError, CapsuleResult};
use capsule_crypto::ManifestSigner;

use crate::backend::StorageBackend;
use crate::local::LocalDirBackend;
use crate::object::{build_from_core_config, ObjectStoreBackend};
use crate::presigned::PresignedUrlBackend;
use crate::url_cache::DirUrlCache;

/// Access key pair for the `s3` backend.
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

/// Construct the backend named by `storage.backend`.
///
/// `presigned_url` needs a request signer; `s3` needs credentials.
pub fn build_backend(
    storage: &StorageConfig,
    signer: Option<Arc<dyn ManifestSigner>>,
    s3: Option<&S3Credentials>,
) -> CapsuleResult<Arc<dyn StorageBackend>> {
    match storage.backend.as_str() {
        "local_dir" => Ok(Arc::new(LocalDirBackend::new(&storage.root))),
        "s3" => {
            let creds = s3.ok_or_else(|| {
                CapsuleError::Config("s3 backend requires AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY".into())
            })?;
            let op = build_from_core_config(storage, &creds.access_key_id, &creds.secret_access_key)
                .map_err(|e| CapsuleError::Config(e.to_string()))?;
            Ok(Arc::new(ObjectStoreBackend::new(op)))
        }
        "presigned_url" => {
            let url = storage.credential_service_url.as_deref().ok_or_else(|| {
                CapsuleError::Config("presigned_url backend requires storage.credential_service_url".into())
            })?;
            let signer = signer.ok_or_else(|| {
                CapsuleError::Config("presigned_url backend requires a signing key".into())
            })?;
            let buffer = Duration::from_secs(storage.url_cache_buffer_secs);
            let mut backend =
                PresignedUrlBackend::new(url, signer, Duration::from_secs(storage.http_timeout_secs))?
                    .with_url_buffer(buffer);
            if let Some(dir) = &storage.url_cache_dir {
                backend = backend.with_cache(Arc::new(DirUrlCache::new(dir, buffer)));
            }
            Ok(Arc::new(backend))
        }
        other => Err(CapsuleError::Config(format!("unknown storage backend: {other}"))),
    }
}
