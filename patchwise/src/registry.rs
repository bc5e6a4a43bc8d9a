//! Release listing and one-hop dependency resolution against a
//! [`PackageRegistry`].

use std::collections::BTreeMap;
use std::fmt;

use node_semver::{Range, Version};
use tracing::{debug, instrument};

use crate::error::PatchError;
use crate::store::PackageRegistry;
use crate::version::{is_local_constraint, max_satisfying, package_key, sort_versions};

/// A dependency of a candidate release pinned to a concrete version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    pub name: String,
    pub version: String,
}

impl fmt::Display for ResolvedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", package_key(&self.name, &self.version))
    }
}

/// What a fresh install of one release would pull in directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OneHop {
    pub prod: Vec<ResolvedDependency>,
    pub dev: Vec<ResolvedDependency>,
}

impl OneHop {
    /// Production dependencies followed by development ones.
    pub fn into_all(self) -> Vec<ResolvedDependency> {
        let mut all = self.prod;
        all.extend(self.dev);
        all
    }
}

/// Released, non-prerelease versions of `name` in ascending order.
///
/// When `after` is one of the releases, it and everything before it are
/// dropped; otherwise the full list is kept.
#[instrument(skip(registry), fields(registry = registry.name()))]
pub async fn possible_versions(
    registry: &dyn PackageRegistry,
    name: &str,
    after: Option<&str>,
) -> Result<Vec<Version>, PatchError> {
    let raw = registry
        .released_versions(name)
        .await
        .map_err(|e| PatchError::lookup(name, &e))?;
    let mut versions = sort_versions(raw);

    if let Some(after) = after.and_then(|a| Version::parse(a).ok()) {
        if let Some(idx) = versions.iter().position(|v| *v == after) {
            versions.drain(..=idx);
        }
    }
    versions.retain(|v| v.pre_release.is_empty());
    Ok(versions)
}

/// Pin one declared constraint to the highest release that satisfies it.
///
/// Local path constraints, unparsable constraints and constraints nothing
/// satisfies come back as [`PatchError::UnparsableConstraint`].
pub async fn resolve_constraint(
    registry: &dyn PackageRegistry,
    name: &str,
    constraint: &str,
) -> Result<Version, PatchError> {
    let unparsable = || PatchError::UnparsableConstraint {
        package: name.to_string(),
        constraint: constraint.to_string(),
    };

    if is_local_constraint(constraint) {
        return Err(unparsable());
    }
    let range = Range::parse(constraint.trim()).map_err(|_| unparsable())?;
    let versions = possible_versions(registry, name, None).await?;
    max_satisfying(&versions, &range).cloned().ok_or_else(unparsable)
}

async fn resolve_all(
    registry: &dyn PackageRegistry,
    constraints: &BTreeMap<String, String>,
) -> Result<Vec<ResolvedDependency>, PatchError> {
    let mut resolved = Vec::with_capacity(constraints.len());
    for (name, constraint) in constraints {
        match resolve_constraint(registry, name, constraint).await {
            Ok(version) => resolved.push(ResolvedDependency {
                name: name.clone(),
                version: version.to_string(),
            }),
            Err(e @ PatchError::UnparsableConstraint { .. }) => {
                debug!(error = %e, "skipping dependency");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(resolved)
}

/// Resolve the production and development dependencies declared by
/// `name@version` against the registry.
#[instrument(skip(registry), fields(registry = registry.name()))]
pub async fn resolve_one_hop(
    registry: &dyn PackageRegistry,
    name: &str,
    version: &str,
) -> Result<OneHop, PatchError> {
    let declared = registry
        .declared_dependencies(name, version)
        .await
        .map_err(|e| PatchError::lookup(package_key(name, version), &e))?;

    let prod = resolve_all(registry, &declared.dependencies).await?;
    let dev = resolve_all(registry, &declared.dev_dependencies).await?;
    debug!(prod = prod.len(), dev = dev.len(), "one-hop set resolved");
    Ok(OneHop { prod, dev })
}
