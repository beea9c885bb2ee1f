//! Deterministic workspace enumeration.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Collect regular files under `root` in component-wise lexicographic order.
///
/// Symlinks are never followed or returned, and anything that resolves
/// outside `root` is skipped.
pub fn workspace_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let real_root = root.canonicalize()?;
    let mut files = Vec::new();
    collect(root, &real_root, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect(dir: &Path, real_root: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            debug!(path = %path.display(), "skipping symlink");
            continue;
        }
        let within_root = path
            .canonicalize()
            .map(|real| real.starts_with(real_root))
            .unwrap_or(false);
        if !within_root {
            debug!(path = %path.display(), "skipping path outside workspace");
            continue;
        }

        if file_type.is_dir() {
            collect(&path, real_root, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_and_recursive() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("memory/2024")).unwrap();
        std::fs::write(tmp.path().join("SOUL.md"), "s").unwrap();
        std::fs::write(tmp.path().join("MEMORY.md"), "m").unwrap();
        std::fs::write(tmp.path().join("memory/2024/a.md"), "a").unwrap();

        let files = workspace_files(tmp.path()).unwrap();
        let rel: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(tmp.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(rel, vec!["MEMORY.md", "SOUL.md", "memory/2024/a.md"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), "x").unwrap();
        std::fs::write(tmp.path().join("MEMORY.md"), "m").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), tmp.path().join("link.md")).unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("linkdir")).unwrap();

        let files = workspace_files(tmp.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("MEMORY.md"));
    }
}
