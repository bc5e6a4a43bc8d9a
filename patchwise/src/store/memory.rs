use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{DeclaredDependencies, PackageRegistry, VulnerabilityStore};
use crate::nvd::NvdItem;

/// Knowledge snapshot held in memory, loadable from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    /// name -> version -> declared dependencies
    #[serde(default)]
    packages: BTreeMap<String, BTreeMap<String, DeclaredDependencies>>,
    #[serde(default)]
    nvd: Vec<NvdItem>,
}

impl MemoryStore {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse knowledge snapshot {}", path.display()))
    }

    pub fn with_package(
        mut self,
        name: &str,
        version: &str,
        declared: DeclaredDependencies,
    ) -> Self {
        self.packages
            .entry(name.to_string())
            .or_default()
            .insert(version.to_string(), declared);
        self
    }

    /// Register `name@version` with production dependencies only.
    pub fn with_release(self, name: &str, version: &str, deps: &[(&str, &str)]) -> Self {
        let declared = DeclaredDependencies {
            dependencies: deps
                .iter()
                .map(|(n, c)| (n.to_string(), c.to_string()))
                .collect(),
            dev_dependencies: BTreeMap::new(),
        };
        self.with_package(name, version, declared)
    }

    pub fn with_record(mut self, record: NvdItem) -> Self {
        self.nvd.push(record);
        self
    }
}

#[async_trait]
impl PackageRegistry for MemoryStore {
    async fn released_versions(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .packages
            .get(name)
            .map(|versions| versions.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn declared_dependencies(&self, name: &str, version: &str) -> Result<DeclaredDependencies> {
        self.packages
            .get(name)
            .and_then(|versions| versions.get(version))
            .cloned()
            .with_context(|| format!("{name}@{version} not found in knowledge snapshot"))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl VulnerabilityStore for MemoryStore {
    async fn records_for_package(&self, name: &str) -> Result<Vec<NvdItem>> {
        Ok(self
            .nvd
            .iter()
            .filter(|record| record.names_product(name))
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
