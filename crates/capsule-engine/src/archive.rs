//! tar + zstd bundling for compressed capsules.
//!
//! Entries are regular files with mode 0644 and mtime 0, appended in sorted
//! path order, so the same inputs always produce the same archive bytes.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Component, Path};

use capsule_core::validate_relpath;
use thiserror::Error;
use tracing::debug;

pub const COMPRESSION_ALGORITHM: &str = "zstd";
pub const ARCHIVE_FORMAT: &str = "tar+zstd";
pub const MAX_LEVEL: u32 = 9;

/// Upper bound on entries read back from one archive.
const MAX_ENTRY_COUNT: usize = 100_000;

/// Upper bound on the decompressed tar stream.
pub const MAX_UNPACKED_BYTES: u64 = 4 * 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("compression level {0} out of range (0-{MAX_LEVEL})")]
    InvalidLevel(u32),

    #[error("unsafe archive entry: {0}")]
    UnsafeEntry(String),

    #[error("duplicate archive entry: {0}")]
    DuplicateEntry(String),

    #[error("archive contents do not match manifest: missing {missing:?}, extra {extra:?}")]
    Mismatch {
        missing: Vec<String>,
        extra: Vec<String>,
    },

    #[error("archive exceeds {MAX_ENTRY_COUNT} entries")]
    TooManyEntries,

    #[error("archive unpacks to more than {0} bytes")]
    TooLarge(u64),

    #[error("archive I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Sizes recorded in the manifest compression section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchiveStats {
    pub original_size_bytes: u64,
    pub compressed_size_bytes: u64,
}

impl ArchiveStats {
    /// compressed / original, 4 decimals; 1.0 for an empty input.
    pub fn ratio(&self) -> f64 {
        if self.original_size_bytes == 0 {
            return 1.0;
        }
        let raw = self.compressed_size_bytes as f64 / self.original_size_bytes as f64;
        (raw * 10_000.0).round() / 10_000.0
    }
}

/// Bundle `(relative path, bytes)` pairs into one zstd-compressed tar.
pub fn build_archive(
    files: &BTreeMap<String, Vec<u8>>,
    level: u32,
) -> Result<(Vec<u8>, ArchiveStats), ArchiveError> {
    if level > MAX_LEVEL {
        return Err(ArchiveError::InvalidLevel(level));
    }

    let mut builder = tar::Builder::new(Vec::new());
    let mut original = 0u64;
    for (path, data) in files {
        validate_relpath(path).map_err(|e| ArchiveError::UnsafeEntry(e.to_string()))?;
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        builder.append_data(&mut header, path, data.as_slice())?;
        original += data.len() as u64;
    }
    let tar_bytes = builder.into_inner()?;

    let compressed = zstd::encode_all(tar_bytes.as_slice(), level as i32)?;
    let stats = ArchiveStats {
        original_size_bytes: original,
        compressed_size_bytes: compressed.len() as u64,
    };
    debug!(
        entries = files.len(),
        original = stats.original_size_bytes,
        compressed = stats.compressed_size_bytes,
        "archive built"
    );
    Ok((compressed, stats))
}

/// Decompress and read every entry, checking the entry set equals `expected`.
///
/// Nothing is written to disk; callers write the returned files once the
/// whole archive has been accepted.
pub fn read_archive(
    archive: &[u8],
    expected: &BTreeSet<String>,
) -> Result<BTreeMap<String, Vec<u8>>, ArchiveError> {
    read_archive_bounded(archive, expected, MAX_UNPACKED_BYTES)
}

/// [`read_archive`] with an explicit cap on the decompressed size.
pub fn read_archive_bounded(
    archive: &[u8],
    expected: &BTreeSet<String>,
    max_unpacked: u64,
) -> Result<BTreeMap<String, Vec<u8>>, ArchiveError> {
    let mut tar_bytes = Vec::new();
    zstd::Decoder::new(archive)?
        .take(max_unpacked.saturating_add(1))
        .read_to_end(&mut tar_bytes)?;
    if tar_bytes.len() as u64 > max_unpacked {
        return Err(ArchiveError::TooLarge(max_unpacked));
    }
    let mut reader = tar::Archive::new(tar_bytes.as_slice());

    let mut files = BTreeMap::new();
    for entry in reader.entries()? {
        let mut entry = entry?;
        if files.len() >= MAX_ENTRY_COUNT {
            return Err(ArchiveError::TooManyEntries);
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            continue;
        }
        let path = entry_path(&entry.path()?)?;
        if entry_type != tar::EntryType::Regular {
            return Err(ArchiveError::UnsafeEntry(format!("{path} ({entry_type:?})")));
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        if files.insert(path.clone(), data).is_some() {
            return Err(ArchiveError::DuplicateEntry(path));
        }
    }

    let found: BTreeSet<String> = files.keys().cloned().collect();
    if &found != expected {
        return Err(ArchiveError::Mismatch {
            missing: expected.difference(&found).cloned().collect(),
            extra: found.difference(expected).cloned().collect(),
        });
    }
    Ok(files)
}

/// Normalize a tar entry path to a validated forward-slash relative path.
fn entry_path(path: &Path) -> Result<String, ArchiveError> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| ArchiveError::UnsafeEntry(path.display().to_string()))?,
            ),
            Component::CurDir => {}
            _ => return Err(ArchiveError::UnsafeEntry(path.display().to_string())),
        }
    }
    let joined = parts.join("/");
    validate_relpath(&joined).map_err(|e| ArchiveError::UnsafeEntry(e.to_string()))?;
    Ok(joined)
}
