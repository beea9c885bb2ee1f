//! Workspace-relative path normalization.
//!
//! Every path that leaves this crate is relative, POSIX, NFC-normalized and
//! free of `..`, `.` and empty components. Storage refs and archive entries
//! go through [`validate_relpath`] before they touch the filesystem.

use std::path::{Component, Path};

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is outside the root: {0}")]
    NotUnderRoot(String),
    #[error("path must be relative: {0}")]
    Absolute(String),
    #[error("path must not contain '..': {0}")]
    ParentTraversal(String),
    #[error("path must not contain backslashes: {0}")]
    Backslash(String),
    #[error("path has an empty or '.' component: {0}")]
    EmptyComponent(String),
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8(String),
}

/// Normalize `path` relative to `root` into the canonical report form.
pub fn normalize_relpath(path: &Path, root: &Path) -> Result<String, PathError> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| PathError::NotUnderRoot(path.display().to_string()))?;

    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| PathError::NonUtf8(rel.display().to_string()))?;
                parts.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(PathError::ParentTraversal(rel.display().to_string()))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::Absolute(rel.display().to_string()))
            }
        }
    }

    let joined: String = parts.join("/").nfc().collect();
    validate_relpath(&joined)?;
    Ok(joined)
}

/// Check that `rel` is a safe relative POSIX path.
pub fn validate_relpath(rel: &str) -> Result<&str, PathError> {
    if rel.contains('\\') {
        return Err(PathError::Backslash(rel.into()));
    }
    if rel.starts_with('/') {
        return Err(PathError::Absolute(rel.into()));
    }
    for part in rel.split('/') {
        match part {
            "" | "." => return Err(PathError::EmptyComponent(rel.into())),
            ".." => return Err(PathError::ParentTraversal(rel.into())),
            _ => {}
        }
    }
    Ok(rel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    #[test]
    fn normalizes_nested_path() {
        let root = PathBuf::from("/ws");
        let rel = normalize_relpath(&root.join("memory").join("day.md"), &root).unwrap();
        assert_eq!(rel, "memory/day.md");
    }

    #[test]
    fn applies_nfc() {
        let root = PathBuf::from("/ws");
        // "e" + combining acute accent
        let decomposed = "cafe\u{301}.md";
        let rel = normalize_relpath(&root.join(decomposed), &root).unwrap();
        assert_eq!(rel, "caf\u{e9}.md");
    }

    #[test]
    fn rejects_paths_outside_root() {
        let err = normalize_relpath(Path::new("/other/file"), Path::new("/ws")).unwrap_err();
        assert!(matches!(err, PathError::NotUnderRoot(_)));
    }

    #[test]
    fn rejects_unsafe_relpaths() {
        assert!(matches!(validate_relpath("../x"), Err(PathError::ParentTraversal(_))));
        assert!(matches!(validate_relpath("a/../../x"), Err(PathError::ParentTraversal(_))));
        assert!(matches!(validate_relpath("/etc/passwd"), Err(PathError::Absolute(_))));
        assert!(matches!(validate_relpath("a\\b"), Err(PathError::Backslash(_))));
        assert!(matches!(validate_relpath("a//b"), Err(PathError::EmptyComponent(_))));
        assert!(matches!(validate_relpath(""), Err(PathError::EmptyComponent(_))));
        assert!(validate_relpath("memory/a.md").is_ok());
        assert!(validate_relpath("..hidden/ok").is_ok());
    }

    proptest! {
        #[test]
        fn normalized_paths_always_validate(parts in prop::collection::vec("[a-zA-Z0-9_.-]{1,12}", 1..5)) {
            prop_assume!(parts.iter().all(|p| p != "." && p != ".."));
            let root = PathBuf::from("/ws");
            let mut path = root.clone();
            for p in &parts {
                path.push(p);
            }
            let rel = normalize_relpath(&path, &root).unwrap();
            prop_assert!(validate_relpath(&rel).is_ok());
            prop_assert_eq!(rel, parts.join("/"));
        }
    }
}
