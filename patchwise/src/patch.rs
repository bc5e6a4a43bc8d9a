use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::vulnerability::Vulnerability;

/// A vulnerable node reached from a direct dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToPatch {
    pub dependency_name: String,
    pub dependency_version: String,
    /// Node keys from the direct dependency down to the vulnerable node.
    /// Empty for vulnerabilities found on a candidate's one-hop set.
    pub path: Vec<String>,
    pub vulnerability: Vulnerability,
}

/// Identity used to compare vulnerabilities across the installed tree and a
/// candidate upgrade: (vulnerability id, affected package, affected version).
pub type VulnerabilityIdentity<'a> = (&'a str, &'a str, &'a str);

impl ToPatch {
    pub fn identity(&self) -> VulnerabilityIdentity<'_> {
        (
            &self.vulnerability.vulnerability_id,
            &self.vulnerability.affected_dependency,
            &self.vulnerability.affected_version,
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchType {
    #[default]
    #[serde(rename = "")]
    Unprocessed,
    #[serde(rename = "FULL")]
    Full,
    #[serde(rename = "PARTIAL")]
    Partial,
    #[serde(rename = "NONE")]
    None,
}

impl fmt::Display for PatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchType::Unprocessed => write!(f, "UNPROCESSED"),
            PatchType::Full => write!(f, "FULL"),
            PatchType::Partial => write!(f, "PARTIAL"),
            PatchType::None => write!(f, "NONE"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchInfo {
    /// The direct dependency's own version is the vulnerable node.
    pub top_level_vulnerable: bool,
    pub classification: PatchType,
    pub unpatchable: Vec<ToPatch>,
    pub patchable: Vec<ToPatch>,
    pub introduced: Vec<ToPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_version: Option<String>,
}

impl PatchInfo {
    pub fn is_processed(&self) -> bool {
        self.classification != PatchType::Unprocessed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspacePatches {
    pub patches: BTreeMap<String, PatchInfo>,
    pub dev_patches: BTreeMap<String, PatchInfo>,
}
