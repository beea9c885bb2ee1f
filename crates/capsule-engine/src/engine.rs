use std::path::Path;
use std::sync::Arc;

use capsule_core::new_capsule_id;
use capsule_core::types::RedactionReport;
use capsule_core::CapsuleResult;
use capsule_redact::RedactionPolicy;
use capsule_storage::StorageBackend;

use crate::schema::{DocumentKind, SchemaSet};

/// Export, import and validate against one storage backend.
///
/// Cheap to clone; the backend and compiled schemas are shared.
#[derive(Clone)]
pub struct CapsuleEngine {
    pub(crate) backend: Arc<dyn StorageBackend>,
    pub(crate) schemas: Arc<SchemaSet>,
}

impl std::fmt::Debug for CapsuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapsuleEngine")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl CapsuleEngine {
    /// Engine using the schemas bundled with this crate.
    pub fn new(backend: Arc<dyn StorageBackend>) -> CapsuleResult<Self> {
        Ok(Self::with_schemas(backend, SchemaSet::embedded()?))
    }

    pub fn with_schemas(backend: Arc<dyn StorageBackend>, schemas: SchemaSet) -> Self {
        Self {
            backend,
            schemas: Arc::new(schemas),
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn schemas(&self) -> &SchemaSet {
        &self.schemas
    }

    /// Classify a workspace without exporting anything.
    pub fn scan(&self, workspace: &Path, policy: &RedactionPolicy) -> CapsuleResult<RedactionReport> {
        let report = policy.scan_workspace(workspace, &new_capsule_id(None))?;
        let value = serde_json::to_value(&report).map_err(anyhow::Error::from)?;
        self.schemas.validate(DocumentKind::RedactionReport, &value)?;
        Ok(report)
    }
}
