#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use capsule_crypto::{Ed25519Signer, KdfParams, ManifestSigner, TrustSet};
use capsule_engine::{CapsuleEngine, EncryptionOptions, ExportOptions, ImportOptions};
use capsule_redact::RedactionPolicy;
use capsule_storage::LocalDirBackend;
use tempfile::TempDir;

pub const PASSPHRASE: &str = "correct horse battery staple";

/// Workspace, local store, engine and signer for one test.
pub struct Harness {
    pub workspace: TempDir,
    pub store: TempDir,
    pub engine: CapsuleEngine,
    pub signer: Arc<dyn ManifestSigner>,
}

impl Harness {
    pub fn new() -> Self {
        let workspace = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        let backend = Arc::new(LocalDirBackend::new(store.path()));
        Self {
            workspace,
            store,
            engine: CapsuleEngine::new(backend).unwrap(),
            signer: Arc::new(Ed25519Signer::generate()),
        }
    }

    /// MEMORY.md (50 bytes), SOUL.md (40 bytes), one dated memory note and a json note.
    pub fn with_default_files(self) -> Self {
        self.write("MEMORY.md", format!("{}\n", "m".repeat(49)).as_bytes());
        self.write("SOUL.md", format!("{}\n", "s".repeat(39)).as_bytes());
        self.write("memory/2026-01-01.md", b"# 2026-01-01\n- shipped capsule export\n");
        self.write("memory/people.json", br#"{"alice": {"role": "maintainer"}}"#);
        self
    }

    pub fn write(&self, rel: &str, data: &[u8]) {
        let path = self.workspace.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    pub fn trusted(&self) -> TrustSet {
        TrustSet::new([self.signer.identity()])
    }

    pub fn blob_path(&self, locator: &str) -> PathBuf {
        self.store.path().join(locator)
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions::new(self.trusted())
    }
}

pub fn export_options() -> ExportOptions {
    ExportOptions::new(RedactionPolicy::workspace_default().unwrap())
}

pub fn encryption() -> EncryptionOptions {
    EncryptionOptions {
        passphrase: secrecy::SecretString::from(PASSPHRASE),
        aead: Default::default(),
        kdf: fast_kdf(),
    }
}

pub fn fast_kdf() -> KdfParams {
    KdfParams {
        mem_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}

/// Relative path → bytes for every regular file under `root`.
pub fn snapshot(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut out: Vec<(String, Vec<u8>)> = capsule_redact::workspace_files(root)
        .unwrap()
        .into_iter()
        .map(|p| {
            let rel = p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
            (rel, std::fs::read(&p).unwrap())
        })
        .collect();
    out.sort();
    out
}

/// Find the first file named `name` anywhere under `root`.
pub fn find_file(root: &Path, name: &str) -> Option<PathBuf> {
    capsule_redact::workspace_files(root)
        .unwrap()
        .into_iter()
        .find(|p| p.file_name().is_some_and(|n| n == name))
}
