//! capsule-storage: pluggable capsule stores
//!
//! Every backend implements [`StorageBackend`]; the engine never looks at the
//! concrete type, only at [`StorageBackend::name`] for manifest metadata.

pub mod backend;
pub mod error;
pub mod factory;
pub mod local;
pub mod object;
pub mod presigned;
pub mod url_cache;

pub use backend::{blob_ref, document_path, parse_blob_ref, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use factory::{build_backend, S3Credentials};
pub use local::LocalDirBackend;
pub use object::{build_from_core_config, build_operator, ObjectStoreBackend, S3Settings};
pub use presigned::{PresignAction, PresignedUrlBackend};
pub use url_cache::{CacheEntryInfo, DirUrlCache, EntryStatus, MemoryUrlCache, PresignedUrls, UrlCache};
