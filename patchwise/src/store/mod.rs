use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::nvd::NvdItem;

/// Published versions and declared dependencies of packages.
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Every released version string, unordered. Unknown packages yield an
    /// empty list.
    async fn released_versions(&self, name: &str) -> anyhow::Result<Vec<String>>;

    /// Constraint maps declared by `name@version`. Unknown releases are an
    /// error.
    async fn declared_dependencies(
        &self,
        name: &str,
        version: &str,
    ) -> anyhow::Result<DeclaredDependencies>;

    fn name(&self) -> &str;
}

/// Source of NVD records keyed by affected product.
#[async_trait]
pub trait VulnerabilityStore: Send + Sync {
    async fn records_for_package(&self, name: &str) -> anyhow::Result<Vec<NvdItem>>;
    fn name(&self) -> &str;
}

/// Dependency name -> version constraint, as declared in a release manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredDependencies {
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, alias = "devDependencies")]
    pub dev_dependencies: BTreeMap<String, String>,
}

pub mod memory;
pub mod npm;
pub mod postgres;

pub use memory::MemoryStore;
pub use npm::NpmRegistry;
pub use postgres::PgKnowledgeStore;

pub const DEFAULT_NPM_REGISTRY_URL: &str = "https://registry.npmjs.org";

/// Pick the registry backend by name. `knowledge` reuses the store that also
/// serves vulnerability records.
pub fn create_registry(
    registry: &str,
    knowledge: Arc<dyn PackageRegistry>,
    npm_base_url: &str,
) -> anyhow::Result<Arc<dyn PackageRegistry>> {
    match registry {
        "knowledge" => Ok(knowledge),
        "npm" => Ok(Arc::new(NpmRegistry::new(npm_base_url)?)),
        other => bail!("unknown registry: {other} (valid: knowledge, npm)"),
    }
}
