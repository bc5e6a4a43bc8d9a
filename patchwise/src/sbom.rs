//! Resolved dependency graph produced by the SBOM stage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::version::package_key;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SbomDocument {
    #[serde(default)]
    pub workspaces: BTreeMap<String, WorkspaceGraph>,
    pub analysis_info: UpstreamInfo,
}

/// Status block carried by every upstream stage's output.
///
/// The status is kept verbatim; anything other than `success` is a failed
/// stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamInfo {
    pub status: String,
}

impl UpstreamInfo {
    pub fn succeeded(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceGraph {
    pub start: StartNode,
    /// Version index: package name -> version -> node.
    #[serde(default)]
    pub dependencies: BTreeMap<String, BTreeMap<String, VersionNode>>,
}

impl WorkspaceGraph {
    pub fn node(&self, name: &str, version: &str) -> Option<&VersionNode> {
        self.dependencies.get(name)?.get(version)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartNode {
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
    #[serde(default)]
    pub dev_dependencies: Vec<DependencyRef>,
}

/// A dependency declared by the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRef {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
}

impl DependencyRef {
    pub fn key(&self) -> String {
        package_key(&self.name, &self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionNode {
    /// `name@version`
    pub key: String,
    /// Child name -> resolved child version, looked up in the same graph.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}
