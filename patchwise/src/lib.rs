//! Upgrade recommendations for vulnerable JavaScript dependencies.
//!
//! Given a resolved dependency graph and the vulnerabilities already matched
//! against it, [`Patcher`] decides for every vulnerable direct dependency
//! whether an upgrade fixes everything (`FULL`), some of it (`PARTIAL`) or
//! nothing (`NONE`), and which version to move to.

pub mod classify;
pub mod diagnostics;
pub mod error;
pub mod nvd;
pub mod options;
pub mod output;
pub mod patch;
pub mod patcher;
pub mod registry;
pub mod sbom;
pub mod search;
pub mod store;
pub mod version;
pub mod vulnerability;
pub mod walker;

pub use diagnostics::{Diagnostics, ErrorKind};
pub use error::PatchError;
pub use options::{PatchOptions, VersionPreference, DEFAULT_MAX_CONCURRENCY};
pub use output::{formatter, AnalysisStatus, OutputFormatter, PatchOutput};
pub use patch::{PatchInfo, PatchType, ToPatch, WorkspacePatches};
pub use patcher::{Patcher, PatcherBuilder};
pub use sbom::SbomDocument;
pub use vulnerability::VulnerabilityDocument;

use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;

/// Read and deserialize an upstream JSON document.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}
