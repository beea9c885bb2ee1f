//! Caches for presigned URL sets.
//!
//! An entry is valid while `now < expires_at - buffer`. Expired and
//! unreadable entries are dropped on lookup, never surfaced as errors.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// URL set returned by the credential service for one capsule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresignedUrls {
    pub manifest: Option<String>,
    pub redaction_report: Option<String>,
    pub blobs: BTreeMap<String, String>,
}

impl PresignedUrls {
    pub fn document(&self, name: &str) -> Option<&str> {
        match name {
            "capsule.manifest.json" | "manifest.json" => self.manifest.as_deref(),
            "redaction.report.json" => self.redaction_report.as_deref(),
            _ => None,
        }
    }
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub trait UrlCache: Send + Sync {
    /// Cached URLs for `key`, if still valid.
    fn get(&self, key: &str) -> Option<PresignedUrls>;

    fn put(&self, key: &str, urls: &PresignedUrls, expires_at: i64);

    fn invalidate(&self, key: &str);
}

// ── In-memory cache ──────────────────────────────────────────────────────

/// Per-backend-instance cache.
pub struct MemoryUrlCache {
    entries: Mutex<HashMap<String, (PresignedUrls, i64)>>,
    buffer: Duration,
}

impl MemoryUrlCache {
    pub fn new(buffer: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            buffer,
        }
    }

    /// Drop every expired entry.
    pub fn evict_expired(&self) {
        let buffer = self.buffer;
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|_, (_, expires_at)| still_valid(*expires_at, buffer));
    }
}

/// `now < expires_at - buffer`, saturating for timestamps near `i64::MIN`.
fn still_valid(expires_at: i64, buffer: Duration) -> bool {
    let buffer = i64::try_from(buffer.as_secs()).unwrap_or(i64::MAX);
    unix_now() < expires_at.saturating_sub(buffer)
}

impl Default for MemoryUrlCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl UrlCache for MemoryUrlCache {
    fn get(&self, key: &str) -> Option<PresignedUrls> {
        let map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let (urls, expires_at) = map.get(key)?;
        still_valid(*expires_at, self.buffer).then(|| urls.clone())
    }

    fn put(&self, key: &str, urls: &PresignedUrls, expires_at: i64) {
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(key.to_string(), (urls.clone(), expires_at));
    }

    fn invalidate(&self, key: &str) {
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(key);
    }
}

// ── Directory-backed cache ───────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    urls: PresignedUrls,
    expires_at: i64,
    cached_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Valid,
    Expired,
    Corrupted,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub file: String,
    pub status: EntryStatus,
    pub expires_at: Option<i64>,
    pub cached_at: Option<i64>,
}

/// Cache shared between processes through one file per key.
///
/// Files are written atomically with owner-only permissions since the URLs
/// grant access to capsule content until they expire.
#[derive(Debug, Clone)]
pub struct DirUrlCache {
    dir: PathBuf,
    buffer: Duration,
}

impl DirUrlCache {
    pub fn new(dir: impl Into<PathBuf>, buffer: Duration) -> Self {
        Self {
            dir: dir.into(),
            buffer,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c == '/' || c == ':' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("urls_{safe}.json"))
    }

    fn is_valid(&self, expires_at: i64) -> bool {
        still_valid(expires_at, self.buffer)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let tmp = self
            .dir
            .join(format!(".urls.{}.tmp", uuid::Uuid::new_v4()));
        let mut opts = std::fs::OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let result = (|| {
            let mut file = opts.open(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
            std::fs::rename(&tmp, path)
        })();
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result
    }

    /// Remove one entry, or every entry when `key` is `None`. Returns the count removed.
    pub fn clear(&self, key: Option<&str>) -> std::io::Result<usize> {
        if let Some(key) = key {
            return match std::fs::remove_file(self.file_for(key)) {
                Ok(()) => Ok(1),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
                Err(e) => Err(e),
            };
        }
        let mut removed = 0;
        for path in self.entry_files()? {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Every cache file with its status, sorted by file name.
    pub fn list(&self) -> std::io::Result<Vec<CacheEntryInfo>> {
        let mut out = Vec::new();
        for path in self.entry_files()? {
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let parsed = std::fs::read(&path)
                .ok()
                .and_then(|raw| serde_json::from_slice::<CacheFile>(&raw).ok());
            out.push(match parsed {
                Some(entry) => CacheEntryInfo {
                    file,
                    status: if self.is_valid(entry.expires_at) {
                        EntryStatus::Valid
                    } else {
                        EntryStatus::Expired
                    },
                    expires_at: Some(entry.expires_at),
                    cached_at: Some(entry.cached_at),
                },
                None => CacheEntryInfo {
                    file,
                    status: EntryStatus::Corrupted,
                    expires_at: None,
                    cached_at: None,
                },
            });
        }
        Ok(out)
    }

    fn entry_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            if name.is_some_and(|n| n.starts_with("urls_") && n.ends_with(".json")) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl UrlCache for DirUrlCache {
    fn get(&self, key: &str) -> Option<PresignedUrls> {
        let path = self.file_for(key);
        let raw = std::fs::read(&path).ok()?;
        match serde_json::from_slice::<CacheFile>(&raw) {
            Ok(entry) if self.is_valid(entry.expires_at) => Some(entry.urls),
            Ok(_) => {
                debug!(key, "cached URLs expired");
                let _ = std::fs::remove_file(&path);
                None
            }
            Err(e) => {
                warn!(key, error = %e, "discarding corrupted URL cache entry");
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    fn put(&self, key: &str, urls: &PresignedUrls, expires_at: i64) {
        let entry = CacheFile {
            urls: urls.clone(),
            expires_at,
            cached_at: unix_now(),
        };
        let written = serde_json::to_vec_pretty(&entry)
            .map_err(std::io::Error::other)
            .and_then(|data| self.write_file(&self.file_for(key), &data));
        if let Err(e) = written {
            warn!(key, error = %e, "failed to write URL cache entry");
        }
    }

    fn invalidate(&self, key: &str) {
        let _ = std::fs::remove_file(self.file_for(key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls() -> PresignedUrls {
        PresignedUrls {
            manifest: Some("https://r2/m".into()),
            redaction_report: Some("https://r2/r".into()),
            blobs: BTreeMap::from([("aa".to_string(), "https://r2/b/aa".to_string())]),
        }
    }

    #[test]
    fn memory_cache_respects_buffer() {
        let cache = MemoryUrlCache::new(Duration::from_secs(300));
        cache.put("c:read", &urls(), unix_now() + 3600);
        assert_eq!(cache.get("c:read"), Some(urls()));

        cache.put("d:read", &urls(), unix_now() + 100);
        assert_eq!(cache.get("d:read"), None, "inside buffer window counts as expired");

        cache.invalidate("c:read");
        assert_eq!(cache.get("c:read"), None);
    }

    #[test]
    fn memory_cache_evicts_expired() {
        let cache = MemoryUrlCache::new(Duration::ZERO);
        cache.put("old", &urls(), unix_now() - 1);
        cache.put("new", &urls(), unix_now() + 60);
        cache.evict_expired();
        assert!(cache.get("new").is_some());
        assert_eq!(cache.entries.lock().unwrap().len(), 1);
    }

    #[test]
    fn extreme_expiry_values_do_not_overflow() {
        let cache = MemoryUrlCache::new(Duration::from_secs(u64::MAX));
        cache.put("min", &urls(), i64::MIN);
        cache.put("max", &urls(), i64::MAX);
        assert_eq!(cache.get("min"), None);
        assert_eq!(cache.get("max"), None);
        cache.evict_expired();
        assert!(cache.entries.lock().unwrap().is_empty());

        let tmp = tempfile::tempdir().unwrap();
        let dir = DirUrlCache::new(tmp.path(), Duration::from_secs(300));
        dir.put("min", &urls(), i64::MIN);
        dir.put("max", &urls(), i64::MAX);
        assert_eq!(dir.get("min"), None);
        assert_eq!(dir.get("max"), Some(urls()));
    }

    #[test]
    fn dir_cache_roundtrip_and_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DirUrlCache::new(tmp.path(), Duration::from_secs(300));
        cache.put("0xAb/0190:read", &urls(), unix_now() + 3600);
        assert!(tmp.path().join("urls_0xAb_0190_read.json").exists());
        assert_eq!(cache.get("0xAb/0190:read"), Some(urls()));
    }

    #[cfg(unix)]
    #[test]
    fn dir_cache_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let cache = DirUrlCache::new(tmp.path(), Duration::ZERO);
        cache.put("k", &urls(), unix_now() + 60);
        let mode = std::fs::metadata(tmp.path().join("urls_k.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn dir_cache_drops_expired_and_corrupted() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DirUrlCache::new(tmp.path(), Duration::from_secs(300));
        cache.put("old", &urls(), unix_now() + 10);
        std::fs::write(tmp.path().join("urls_bad.json"), b"{not json").unwrap();

        let listed = cache.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].file, "urls_bad.json");
        assert_eq!(listed[0].status, EntryStatus::Corrupted);
        assert_eq!(listed[1].status, EntryStatus::Expired);

        assert_eq!(cache.get("old"), None);
        assert_eq!(cache.get("bad"), None);
        assert!(cache.list().unwrap().is_empty());
    }

    #[test]
    fn dir_cache_clear() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = DirUrlCache::new(tmp.path(), Duration::ZERO);
        cache.put("a", &urls(), unix_now() + 60);
        cache.put("b", &urls(), unix_now() + 60);
        assert_eq!(cache.clear(Some("a")).unwrap(), 1);
        assert_eq!(cache.clear(Some("a")).unwrap(), 0);
        assert_eq!(cache.clear(None).unwrap(), 1);
        assert!(cache.list().unwrap().is_empty());
    }

    #[test]
    fn document_lookup_by_name() {
        let u = urls();
        assert_eq!(u.document("capsule.manifest.json"), Some("https://r2/m"));
        assert_eq!(u.document("manifest.json"), Some("https://r2/m"));
        assert_eq!(u.document("redaction.report.json"), Some("https://r2/r"));
        assert_eq!(u.document("other.json"), None);
    }
}
