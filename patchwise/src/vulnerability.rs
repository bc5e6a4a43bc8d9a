//! Vulnerabilities already matched against the dependency graph by the
//! vulnerability-finder stage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sbom::UpstreamInfo;
use crate::version::package_key;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityDocument {
    #[serde(default)]
    pub workspaces: BTreeMap<String, WorkspaceVulnerabilities>,
    pub analysis_info: UpstreamInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceVulnerabilities {
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub vulnerability_id: String,
    pub affected_dependency: String,
    pub affected_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
}

impl Vulnerability {
    /// The graph key this vulnerability was matched on.
    pub fn affected_key(&self) -> String {
        package_key(&self.affected_dependency, &self.affected_version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Severity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

/// Which versions of the affected package a vulnerability covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Evidence {
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        introduced: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fixed: Option<String>,
    },
    Exact {
        version: String,
    },
    /// Every version is affected and no fix is known.
    Universal,
}

impl Evidence {
    pub fn label(&self) -> &'static str {
        match self {
            Evidence::Range { .. } => "range",
            Evidence::Exact { .. } => "exact",
            Evidence::Universal => "universal",
        }
    }
}
